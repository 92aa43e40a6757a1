use anyhow::Result;
use chrono_tz::Tz;
use core::fmt;

use crate::timefmt;

#[derive(Debug)]
pub enum FilterError {
    HalfOpenDateRange,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HalfOpenDateRange => {
                write!(f, "a date range needs both its from and to bounds")
            }
        }
    }
}

impl std::error::Error for FilterError {}

/// Conjunctive selection over the log store. Every user-supplied value is
/// bound as a SQL parameter; the single exception is [`LogFilter::raw`].
#[derive(Debug, Default)]
pub struct LogFilter {
    clauses: Vec<String>,
    params: Vec<String>,
}

impl LogFilter {
    /// Assemble a filter from the optional export inputs. Bounds are wall
    /// clock times in `zone` and must be given together or not at all.
    pub fn from_options(
        from_date: Option<&str>,
        to_date: Option<&str>,
        vhosts: Option<&str>,
        condition: Option<&str>,
        zone: Tz,
    ) -> Result<Self> {
        let mut filter = Self::default();
        match (from_date, to_date) {
            (Some(from), Some(to)) => filter = filter.date_range(from, to, zone)?,
            (None, None) => {}
            _ => return Err(FilterError::HalfOpenDateRange.into()),
        }
        if let Some(vhosts) = vhosts {
            filter = filter.vhosts(vhosts);
        }
        if let Some(condition) = condition {
            filter = filter.raw(condition);
        }
        Ok(filter)
    }

    /// Inclusive range over the stored (UTC) timestamp, given as wall clock
    /// times in `zone`.
    pub fn date_range(mut self, from: &str, to: &str, zone: Tz) -> Result<Self> {
        let from = timefmt::parse_wall(from, zone)?;
        let to = timefmt::parse_wall(to, zone)?;
        self.params.push(timefmt::format_storage(from));
        self.params.push(timefmt::format_storage(to));
        self.clauses.push("(date BETWEEN ? AND ?)".to_string());
        Ok(self)
    }

    /// Membership in a comma-separated vhost list. Elements are trimmed and
    /// bound as literals, so quoting tricks cannot escape the comparison.
    pub fn vhosts(mut self, list: &str) -> Self {
        let names: Vec<&str> = list.split(',').map(str::trim).collect();
        let placeholders = vec!["?"; names.len()].join(",");
        self.clauses.push(format!("vhost IN ({})", placeholders));
        self.params.extend(names.into_iter().map(String::from));
        self
    }

    /// Escape hatch: a verbatim SQL fragment, appended unvalidated. The
    /// caller is trusted with the full query language here.
    pub fn raw(mut self, condition: &str) -> Self {
        self.clauses.push(format!("({})", condition));
        self
    }

    /// The `WHERE ...` part of the query, empty when unrestricted.
    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;

    #[test]
    fn test_empty_filter_is_unrestricted() {
        let filter = LogFilter::from_options(None, None, None, None, Berlin).unwrap();
        assert_eq!(filter.where_clause(), "");
        assert!(filter.params().is_empty());
    }

    #[test]
    fn test_date_range_needs_both_bounds() {
        let err = LogFilter::from_options(Some("2024-01-10 00:00:00"), None, None, None, Berlin)
            .unwrap_err();
        assert!(err.downcast_ref::<FilterError>().is_some());
        let err = LogFilter::from_options(None, Some("2024-01-10 23:59:59"), None, None, Berlin)
            .unwrap_err();
        assert!(err.downcast_ref::<FilterError>().is_some());
    }

    #[test]
    fn test_date_range_is_stored_in_utc() {
        let filter = LogFilter::default()
            .date_range("2024-01-10 00:00:00", "2024-01-10 23:59:59", Berlin)
            .unwrap();
        assert_eq!(filter.where_clause(), " WHERE (date BETWEEN ? AND ?)");
        // Berlin is +0100 in January
        assert_eq!(filter.params(), ["2024-01-09 23:00:00", "2024-01-10 22:59:59"]);
    }

    #[test]
    fn test_vhosts_are_trimmed_and_bound() {
        let filter = LogFilter::default().vhosts(" a , b ,c ");
        assert_eq!(filter.where_clause(), " WHERE vhost IN (?,?,?)");
        assert_eq!(filter.params(), ["a", "b", "c"]);
    }

    #[test]
    fn test_quote_in_vhost_stays_a_literal() {
        let filter = LogFilter::default().vhosts("a' OR '1'='1");
        // still a single bound parameter, not part of the SQL text
        assert_eq!(filter.where_clause(), " WHERE vhost IN (?)");
        assert_eq!(filter.params(), ["a' OR '1'='1"]);
    }

    #[test]
    fn test_conjuncts_are_anded() {
        let filter = LogFilter::from_options(
            Some("2024-01-10 00:00:00"),
            Some("2024-01-10 23:59:59"),
            Some("site1,site2"),
            Some("status = 200"),
            Berlin,
        )
        .unwrap();
        assert_eq!(
            filter.where_clause(),
            " WHERE (date BETWEEN ? AND ?) AND vhost IN (?,?) AND (status = 200)"
        );
        assert_eq!(filter.params().len(), 4);
    }
}
