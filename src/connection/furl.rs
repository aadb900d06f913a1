use crate::error::{BrokerError, Result};
use std::fmt;
use std::str::FromStr;

const FURL_SCHEME: &str = "pb://";

/// A parsed storage endpoint reference: `pb://<tub-id>@<hint>[,<hint>...]/<name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Furl {
    pub tub_id: String,
    pub location_hints: Vec<String>,
    pub name: String,
}

impl Furl {
    /// `host:port` pairs for the hints that can be reached over plain TCP.
    ///
    /// Accepts `tcp:host:port` and the legacy bare `host:port` form; other
    /// hint types are skipped.
    pub fn tcp_addresses(&self) -> Vec<String> {
        self.location_hints
            .iter()
            .filter_map(|hint| {
                let addr = match hint.strip_prefix("tcp:") {
                    Some(rest) => rest,
                    // a typed hint like tor:host:port has a second colon
                    None if hint.matches(':').count() == 1 => hint.as_str(),
                    None => return None,
                };

                let (host, port) = addr.rsplit_once(':')?;
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return None;
                }
                Some(addr.to_string())
            })
            .collect()
    }
}

impl FromStr for Furl {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| BrokerError::InvalidFurl {
            furl: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s
            .strip_prefix(FURL_SCHEME)
            .ok_or_else(|| invalid("missing pb:// scheme"))?;
        let (tub_id, rest) = rest
            .split_once('@')
            .ok_or_else(|| invalid("missing '@' after tub id"))?;
        let (hints, name) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing '/' before object name"))?;

        if tub_id.is_empty() {
            return Err(invalid("empty tub id"));
        }

        let location_hints = hints
            .split(',')
            .filter(|h| !h.is_empty())
            .map(String::from)
            .collect();

        Ok(Furl {
            tub_id: tub_id.to_string(),
            location_hints,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Furl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}@{}/{}",
            FURL_SCHEME,
            self.tub_id,
            self.location_hints.join(","),
            self.name
        )
    }
}
