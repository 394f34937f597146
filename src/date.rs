//! The `Date` header value
use std::cell::RefCell;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

thread_local! {
    // formatted at most once per second and thread
    static CACHE: RefCell<(i64, String)> = RefCell::new((i64::MIN, String::new()));
}

/// format a time the way HTTP headers want it
pub fn format(t: OffsetDateTime) -> String {
    t.format(HTTP_DATE).unwrap_or_default()
}

/// the current time as an HTTP date
pub fn now() -> String {
    let now = OffsetDateTime::now_utc();
    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.0 != now.unix_timestamp() {
            *cache = (now.unix_timestamp(), format(now));
        }
        cache.1.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn rfc_1123() {
        assert_eq!(
            format(datetime!(1994-11-06 08:49:37 UTC)),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
    }

    #[test]
    fn now_is_cached() {
        let a = now();
        assert_eq!(a.len(), 29);
        assert!(a.ends_with(" GMT"));
    }
}
