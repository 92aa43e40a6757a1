// parse combined log format:
//   ip ident authuser [timestamp] "request" status bytes "referer" "useragent"

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};

use super::LogParser;
use crate::record::Record;
use crate::timefmt;

#[derive(Default)]
pub struct CombinedParser {}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl LogParser for CombinedParser {
    fn parse(&self, vhost: &str, line: &str) -> Result<Record> {
        // The three quoted fields may contain anything but an unescaped
        // quote, so exactly six quote characters delimit them.
        let quotes: Vec<usize> = line.match_indices('"').map(|(i, _)| i).collect();
        if quotes.len() != 6 {
            bail!("expected 6 quote delimiters, found {}", quotes.len());
        }

        // Everything before the request: `ip ident authuser [timestamp] `
        let pre = &line[..quotes[0]];
        let bracket_open = pre
            .find('[')
            .ok_or(anyhow!("no opening bracket for time found"))?;
        let bracket_close = pre
            .rfind(']')
            .ok_or(anyhow!("no closing bracket for time found"))?;
        if bracket_close < bracket_open {
            bail!("mismatched time brackets");
        }
        let head: Vec<&str> = pre[..bracket_open].split_whitespace().collect();
        if head.len() != 3 {
            bail!(
                "expected ip, ident and authuser before the time, found {} tokens",
                head.len()
            );
        }
        if !pre[bracket_close + 1..].trim().is_empty() {
            bail!("unexpected tokens between time and request");
        }
        let time_str = &pre[bracket_open + 1..bracket_close];

        let request = &line[quotes[0] + 1..quotes[1]];

        // Between the request and the referer: ` status bytes `
        let mid: Vec<&str> = line[quotes[1] + 1..quotes[2]].split_whitespace().collect();
        if mid.len() != 2 {
            bail!("expected status and bytes after request, found {} tokens", mid.len());
        }
        if mid[0].len() != 3 || !all_digits(mid[0]) {
            bail!("status is not a 3-digit code: {}", mid[0]);
        }
        let status: u16 = mid[0].parse()?;
        let bytes = match mid[1] {
            "-" => None,
            s if all_digits(s) => Some(s.parse::<u64>()?),
            s => bail!("invalid bytes field: {}", s),
        };

        let referer = &line[quotes[2] + 1..quotes[3]];
        if &line[quotes[3] + 1..quotes[4]] != " " {
            bail!("expected a single space between referer and user agent");
        }
        let useragent = &line[quotes[4] + 1..quotes[5]];
        if !line[quotes[5] + 1..].trim().is_empty() {
            bail!("trailing data after user agent");
        }

        // A structurally valid line with a bad timestamp is still kept, at
        // the zero instant. Filters on real date ranges will not see it.
        let timestamp = match timefmt::parse_clf(time_str) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("keeping record with unparsable time {:?}: {}", time_str, e);
                DateTime::<Utc>::UNIX_EPOCH
            }
        };

        Ok(Record {
            vhost: vhost.to_string(),
            ip: head[0].to_string(),
            ident: head[1].to_string(),
            authuser: head[2].to_string(),
            timestamp,
            request: request.to_string(),
            status,
            bytes,
            referer: referer.to_string(),
            useragent: useragent.to_string(),
        })
    }
}
