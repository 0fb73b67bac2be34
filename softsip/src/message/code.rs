/// Reason phrase for the `Trying` status code (100).
pub const REASON_TRYING: &str = "Trying";
/// Reason phrase for the `Ringing` status code (180).
pub const REASON_RINGING: &str = "Ringing";
/// Reason phrase for the `Session Progress` status code (183).
pub const REASON_SESSION_PROGRESS: &str = "Session Progress";
/// Reason phrase for the `OK` status code (200).
pub const REASON_OK: &str = "OK";
/// Reason phrase for the `Bad Request` status code (400).
pub const REASON_BAD_REQUEST: &str = "Bad Request";
/// Reason phrase for the `Unauthorized` status code (401).
pub const REASON_UNAUTHORIZED: &str = "Unauthorized";
/// Reason phrase for the `Forbidden` status code (403).
pub const REASON_FORBIDDEN: &str = "Forbidden";
/// Reason phrase for the `Not Found` status code (404).
pub const REASON_NOT_FOUND: &str = "Not Found";
/// Reason phrase for the `Method Not Allowed` status code (405).
pub const REASON_METHOD_NOT_ALLOWED: &str = "Method Not Allowed";
/// Reason phrase for the `Proxy Authentication Required` status code (407).
pub const REASON_PROXY_AUTHENTICATION_REQUIRED: &str = "Proxy Authentication Required";
/// Reason phrase for the `Request Timeout` status code (408).
pub const REASON_REQUEST_TIMEOUT: &str = "Request Timeout";
/// Reason phrase for the `Temporarily Unavailable` status code (480).
pub const REASON_TEMPORARILY_UNAVAILABLE: &str = "Temporarily Unavailable";
/// Reason phrase for the `Call/Transaction Does Not Exist` status code (481).
pub const REASON_CALL_OR_TRANSACTION_DOES_NOT_EXIST: &str = "Call/Transaction Does Not Exist";
/// Reason phrase for the `Busy Here` status code (486).
pub const REASON_BUSY_HERE: &str = "Busy Here";
/// Reason phrase for the `Request Terminated` status code (487).
pub const REASON_REQUEST_TERMINATED: &str = "Request Terminated";
/// Reason phrase for the `Not Acceptable Here` status code (488).
pub const REASON_NOT_ACCEPTABLE_HERE: &str = "Not Acceptable Here";
/// Reason phrase for the `Server Internal Error` status code (500).
pub const REASON_SERVER_INTERNAL_ERROR: &str = "Server Internal Error";
/// Reason phrase for the `Service Unavailable` status code (503).
pub const REASON_SERVICE_UNAVAILABLE: &str = "Service Unavailable";
/// Reason phrase for the `Busy Everywhere` status code (600).
pub const REASON_BUSY_EVERYWHERE: &str = "Busy Everywhere";
/// Reason phrase for the `Decline` status code (603).
pub const REASON_DECLINE: &str = "Decline";

/// An SIP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[repr(i32)]
pub enum StatusCode {
    /// `Trying` status code.
    Trying = 100,
    /// `Ringing` status code.
    Ringing = 180,
    /// `Session Progress` status code.
    SessionProgress = 183,

    /// `OK` status code.
    Ok = 200,

    /// `Bad Request` status code.
    BadRequest = 400,
    /// `Unauthorized` status code.
    Unauthorized = 401,
    /// `Forbidden` status code.
    Forbidden = 403,
    /// `Not Found` status code.
    NotFound = 404,
    /// `SipMethod Not Allowed` status code.
    MethodNotAllowed = 405,
    /// `Proxy Authentication Required` status code.
    ProxyAuthenticationRequired = 407,
    /// `Request Timeout` status code.
    RequestTimeout = 408,
    /// `Temporarily Unavailable` status code.
    TemporarilyUnavailable = 480,
    /// `Call or Transaction Does Not Exist` status code.
    CallOrTransactionDoesNotExist = 481,
    /// `Busy Here` status code.
    BusyHere = 486,
    /// `Request Terminated` status code.
    RequestTerminated = 487,
    /// `Not Acceptable Here` status code.
    NotAcceptableHere = 488,

    /// `Server Internal Error` status code.
    ServerInternalError = 500,
    /// `Service Unavailable` status code.
    ServiceUnavailable = 503,

    /// `Busy Everywhere` status code.
    BusyEverywhere = 600,
    /// `Decline` status code.
    Decline = 603,

    /// A non-standard or unknown status code.
    Custom(i32),
}

// https://en.wikipedia.org/wiki/List_of_SIP_response_codes
impl StatusCode {
    /// Returns the reason text related to the status code.
    pub const fn reason(&self) -> &'static str {
        match self {
            // 1xx — Provisional Responses
            StatusCode::Trying => REASON_TRYING,
            StatusCode::Ringing => REASON_RINGING,
            StatusCode::SessionProgress => REASON_SESSION_PROGRESS,

            // 2xx — Successful Responses
            StatusCode::Ok => REASON_OK,

            // 4xx — Client Failure Responses
            StatusCode::BadRequest => REASON_BAD_REQUEST,
            StatusCode::Unauthorized => REASON_UNAUTHORIZED,
            StatusCode::Forbidden => REASON_FORBIDDEN,
            StatusCode::NotFound => REASON_NOT_FOUND,
            StatusCode::MethodNotAllowed => REASON_METHOD_NOT_ALLOWED,
            StatusCode::ProxyAuthenticationRequired => REASON_PROXY_AUTHENTICATION_REQUIRED,
            StatusCode::RequestTimeout => REASON_REQUEST_TIMEOUT,
            StatusCode::TemporarilyUnavailable => REASON_TEMPORARILY_UNAVAILABLE,
            StatusCode::CallOrTransactionDoesNotExist => REASON_CALL_OR_TRANSACTION_DOES_NOT_EXIST,
            StatusCode::BusyHere => REASON_BUSY_HERE,
            StatusCode::RequestTerminated => REASON_REQUEST_TERMINATED,
            StatusCode::NotAcceptableHere => REASON_NOT_ACCEPTABLE_HERE,

            // 5xx — Server Failure Responses
            StatusCode::ServerInternalError => REASON_SERVER_INTERNAL_ERROR,
            StatusCode::ServiceUnavailable => REASON_SERVICE_UNAVAILABLE,

            // 6xx — Global Failure Responses
            StatusCode::BusyEverywhere => REASON_BUSY_EVERYWHERE,
            StatusCode::Decline => REASON_DECLINE,

            // Unknown or custom status
            _ => "Unknown",
        }
    }

    /// Returns [`true`] if its status code is provisional (from `100` to
    /// `199`), and [`false`] otherwise.
    #[inline]
    pub const fn is_provisional(&self) -> bool {
        self.into_i32() < 200
    }

    #[inline]
    /// Returns [`true`] if its status code is final (from `200` to `699`), and
    /// [`false`] otherwise.
    pub const fn is_final(&self) -> bool {
        !self.is_provisional()
    }

    /// Returns the response class digit (`1` for provisional, `2` for success
    /// and so on).
    #[inline]
    pub const fn class(&self) -> i32 {
        self.into_i32() / 100
    }

    /// Converts a `StatusCode` into its numeric code.
    pub const fn into_i32(self) -> i32 {
        match self {
            StatusCode::Trying => 100,
            StatusCode::Ringing => 180,
            StatusCode::SessionProgress => 183,

            StatusCode::Ok => 200,

            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::ProxyAuthenticationRequired => 407,
            StatusCode::RequestTimeout => 408,
            StatusCode::TemporarilyUnavailable => 480,
            StatusCode::CallOrTransactionDoesNotExist => 481,
            StatusCode::BusyHere => 486,
            StatusCode::RequestTerminated => 487,
            StatusCode::NotAcceptableHere => 488,

            StatusCode::ServerInternalError => 500,
            StatusCode::ServiceUnavailable => 503,

            StatusCode::BusyEverywhere => 600,
            StatusCode::Decline => 603,
            StatusCode::Custom(n) => n,
        }
    }
}

impl From<i32> for StatusCode {
    fn from(value: i32) -> Self {
        match value {
            100 => StatusCode::Trying,
            180 => StatusCode::Ringing,
            183 => StatusCode::SessionProgress,
            200 => StatusCode::Ok,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            407 => StatusCode::ProxyAuthenticationRequired,
            408 => StatusCode::RequestTimeout,
            480 => StatusCode::TemporarilyUnavailable,
            481 => StatusCode::CallOrTransactionDoesNotExist,
            486 => StatusCode::BusyHere,
            487 => StatusCode::RequestTerminated,
            488 => StatusCode::NotAcceptableHere,
            500 => StatusCode::ServerInternalError,
            503 => StatusCode::ServiceUnavailable,
            600 => StatusCode::BusyEverywhere,
            603 => StatusCode::Decline,
            other => StatusCode::Custom(other),
        }
    }
}

impl From<&[u8]> for StatusCode {
    fn from(value: &[u8]) -> Self {
        let code = std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(0);

        code.into()
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_i32())
    }
}
