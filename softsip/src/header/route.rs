use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::{Parameters, SipAddr};
use crate::parser::Parser;

/// The `Route` SIP header.
///
/// Forces a request to visit the listed proxies on its way to the target.
/// In-dialog requests carry the route set learned from `Record-Route`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Route {
    /// The route address.
    pub addr: SipAddr,
    /// Any header parameters.
    pub params: Option<Parameters>,
}

impl Route {
    /// Creates a new `Route` header.
    pub fn new(addr: SipAddr) -> Self {
        Self { addr, params: None }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Route::NAME, self.addr)?;
        if let Some(params) = &self.params {
            write!(f, "{params}")?;
        }
        Ok(())
    }
}

impl HeaderParse for Route {
    const NAME: &'static str = "Route";

    /*
     * Route        =  "Route" HCOLON route-param *(COMMA route-param)
     * route-param  =  name-addr *( SEMI rr-param )
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let addr = parser.parse_sip_addr()?;
        let params = crate::macros::parse_param!(parser,);

        Ok(Route { addr, params })
    }
}
