use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::timefmt;

/// One access log entry. Timestamps are UTC internally; a display zone is
/// applied only when rendering back to text. `vhost` comes from the folder
/// the line was ingested from, never from the line itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub vhost: String,
    pub ip: String,
    pub ident: String,
    pub authuser: String,
    pub timestamp: DateTime<Utc>,
    pub request: String,
    pub status: u16,
    /// `None` is the CLF `-` sentinel, distinct from 0.
    pub bytes: Option<u64>,
    pub referer: String,
    pub useragent: String,
}

impl Record {
    /// Render in the VCOMBINED layout goaccess expects: the vhost (with a
    /// fixed `:80` port literal) prepended to an ordinary combined log line.
    pub fn to_combined_line(&self, zone: Tz) -> String {
        let bytes = match self.bytes {
            Some(n) => n.to_string(),
            None => "-".to_string(),
        };
        format!(
            "{}:80 {} {} {} [{}] \"{}\" {} {} \"{}\" \"{}\"",
            self.vhost,
            self.ip,
            self.ident,
            self.authuser,
            timefmt::format_clf(self.timestamp, zone),
            self.request,
            self.status,
            bytes,
            self.referer,
            self.useragent,
        )
    }
}
