use itertools::Itertools;
use tokio::sync::{mpsc, Mutex};
use util::DnsResolver;

use super::{Endpoint, EndpointService, Inner};
use crate::config::Config;
use crate::header::Allow;
use crate::transaction::Transactions;
use crate::transport::Transports;

/// Builder for creating a new SIP `Endpoint`.
pub struct EndpointBuilder {
    config: Config,
    resolver: DnsResolver,
    capabilities: Allow,
    services: Vec<Box<dyn EndpointService>>,
}

impl EndpointBuilder {
    /// Creates a new default instance of `EndpointBuilder` to construct a
    /// `Endpoint`.
    pub fn new() -> Self {
        EndpointBuilder {
            config: Config::default(),
            resolver: DnsResolver::default(),
            capabilities: Allow::supported(),
            services: vec![],
        }
    }

    /// Sets the endpoint name used in `User-Agent` headers.
    pub fn with_name<T: AsRef<str>>(mut self, s: T) -> Self {
        self.config.user_agent = s.as_ref().to_string();

        self
    }

    /// Sets the endpoint configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;

        self
    }

    /// Sets the DNS resolver.
    pub fn with_resolver(mut self, resolver: DnsResolver) -> Self {
        self.resolver = resolver;

        self
    }

    /// Adds a service to the endpoint.
    ///
    /// This function can be called multiple times to add additional services.
    /// If a service with the same name already exists, the new service will
    /// not be added.
    pub fn with_service(mut self, service: impl EndpointService) -> Self {
        if self.service_exists(service.name()) {
            return self;
        }
        self.services.push(Box::new(service));

        self
    }

    /// Add a collection of services to the endpoint.
    ///
    /// Similar to [`EndpointBuilder::with_service`], but allows adding
    /// multiple services at once as trait objects.
    pub fn with_services<I>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn EndpointService>>,
    {
        for service in services {
            if self.service_exists(service.name()) {
                continue;
            }
            self.services.push(service);
        }

        self
    }

    fn service_exists(&self, name: &str) -> bool {
        let exists = self.services.iter().any(|s| s.name() == name);
        if exists {
            log::warn!("Service with name '{}' already exists", name);
        }
        exists
    }

    /// Finalize the builder into a `Endpoint`.
    pub fn build(self) -> Endpoint {
        log::trace!("Creating endpoint...");
        log::debug!(
            "Services registered {}",
            format_args!("({})", self.services.iter().map(|s| s.name()).join(", "))
        );

        let (transport_tx, transport_rx) = mpsc::channel(64);

        Endpoint(std::sync::Arc::new(Inner {
            transports: Transports::new(),
            transactions: Transactions::new(),
            config: self.config,
            capabilities: self.capabilities,
            resolver: self.resolver,
            services: self.services,
            transport_tx,
            transport_rx: Mutex::new(Some(transport_rx)),
        }))
    }
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}
