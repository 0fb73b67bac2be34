use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::{Parameters, SipAddr};
use crate::parser::Parser;

/// The `Record-Route` SIP header.
///
/// Inserted by proxies that want to stay on the path of subsequent requests
/// in the dialog. The dialog's route set is built from these headers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RecordRoute {
    /// The route address.
    pub addr: SipAddr,
    /// Any header parameters.
    pub params: Option<Parameters>,
}

impl RecordRoute {
    /// Creates a new `Record-Route` header.
    pub fn new(addr: SipAddr) -> Self {
        Self { addr, params: None }
    }
}

impl fmt::Display for RecordRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", RecordRoute::NAME, self.addr)?;
        if let Some(params) = &self.params {
            write!(f, "{params}")?;
        }
        Ok(())
    }
}

impl HeaderParse for RecordRoute {
    const NAME: &'static str = "Record-Route";

    /*
     * Record-Route  =  "Record-Route" HCOLON rec-route *(COMMA rec-route)
     * rec-route     =  name-addr *( SEMI rr-param )
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let addr = parser.parse_sip_addr()?;
        let params = crate::macros::parse_param!(parser,);

        Ok(RecordRoute { addr, params })
    }
}
