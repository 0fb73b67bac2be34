macro_rules! b_map {
    ($name:ident => $( $slice:expr ),+) => {
        const $name: [bool; 256] = {
            let mut arr = [false; 256];
            $(
                let slice = $slice;
                let mut i = 0;
                while i < slice.len() {
                    arr[slice[i] as usize] = true;
                    i += 1;
                }
            )*
            arr
        };
    };
}

macro_rules! parse_param {
    (
        $scanner:ident,
        $($name:ident = $var:expr),*
    ) =>  {{
        $scanner.take_ws();
        match $scanner.peek() {
            Some(b';') => {
                let mut params = $crate::message::Parameters::new();
                while let Some(b';') = $scanner.peek() {
                        // take ';' character
                        $scanner.advance();
                        let param = $scanner.parse_ref_param()?;
                        $(
                            if param.0.eq_ignore_ascii_case($name) {
                                $var = param.1;
                                $scanner.take_ws();
                                continue;
                            }
                        )*
                        params.push(param.into());
                        $scanner.take_ws();
                    }
                    if params.is_empty() {
                        None
                    } else {
                        Some(params)
                    }
                },
                _ => {
                    None
                }
            }
        }}
    }

#[macro_export]
macro_rules! filter_map_header {
    ($hdrs:expr, $header:ident) => {
        $hdrs.iter().filter_map(|hdr| {
            if let $crate::header::Header::$header(v) = hdr {
                Some(v)
            } else {
                None
            }
        })
    };
}

#[macro_export]
macro_rules! find_map_header {
    ($hdrs:expr, $header:ident) => {
        $hdrs.iter().find_map(|hdr| {
            if let $crate::header::Header::$header(v) = hdr {
                Some(v)
            } else {
                None
            }
        })
    };
}

macro_rules! parse_error {
    ($message:expr) => {{
        Err($crate::error::Error::ParseError($crate::error::SipParserError::new(
            $message,
        )))
    }};
}

pub(crate) use b_map;
pub(crate) use parse_error;
pub(crate) use parse_param;
