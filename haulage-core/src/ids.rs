//! Opaque identifiers handed to customers and providers.
//!
//! - tracking number: `MV-{8 uppercase alphanumerics}`
//! - job number: `JOB-{YYYYMM}-{NNN}`, numbered per calendar month
//! - request id: `REQ{YYYYMMDD}{4 alphanumerics}`

use compact_str::{CompactString, format_compact};
use rand::Rng;
use time::Date;

const UPPER_ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts at the sequential job number before falling back to a random one.
pub const JOB_NUMBER_MAX_SEQUENTIAL_ATTEMPTS: u32 = 1000;

fn random_alnum<R: Rng + ?Sized>(rng: &mut R, len: usize) -> CompactString {
    (0..len)
        .map(|_| UPPER_ALNUM[rng.random_range(0..UPPER_ALNUM.len())] as char)
        .collect()
}

pub fn new_tracking_number() -> CompactString {
    let mut rng = rand::rng();
    format_compact!("MV-{}", random_alnum(&mut rng, 8))
}

pub fn new_request_id(date: Date) -> CompactString {
    let mut rng = rand::rng();
    format_compact!(
        "REQ{:04}{:02}{:02}{}",
        date.year(),
        u8::from(date.month()),
        date.day(),
        random_alnum(&mut rng, 4)
    )
}

/// `JOB-YYYYMM-` for the month containing `date`.
pub fn job_number_prefix(date: Date) -> CompactString {
    format_compact!("JOB-{:04}{:02}-", date.year(), u8::from(date.month()))
}

pub fn sequential_job_number(date: Date, sequence: u32) -> CompactString {
    format_compact!("{}{:03}", job_number_prefix(date), sequence)
}

pub fn random_job_number(date: Date) -> CompactString {
    let n: u16 = rand::rng().random_range(0..10_000);
    format_compact!("{}{:04}", job_number_prefix(date), n)
}

pub fn is_tracking_number(s: &str) -> bool {
    s.strip_prefix("MV-").is_some_and(|rest| {
        rest.len() == 8 && rest.bytes().all(|b| UPPER_ALNUM.contains(&b))
    })
}

pub fn is_job_number(s: &str) -> bool {
    let Some(rest) = s.strip_prefix("JOB-") else {
        return false;
    };
    let Some((month, seq)) = rest.split_once('-') else {
        return false;
    };
    month.len() == 6
        && month.bytes().all(|b| b.is_ascii_digit())
        && (3..=4).contains(&seq.len())
        && seq.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_request_id(s: &str) -> bool {
    s.strip_prefix("REQ").is_some_and(|rest| {
        rest.len() == 12
            && rest[..8].bytes().all(|b| b.is_ascii_digit())
            && rest[8..].bytes().all(|b| UPPER_ALNUM.contains(&b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_tracking_number_shape() {
        for _ in 0..50 {
            let t = new_tracking_number();
            assert!(is_tracking_number(&t), "{t}");
        }
        assert!(!is_tracking_number("MV-abcdefgh"));
        assert!(!is_tracking_number("MV-ABC"));
    }

    #[test]
    fn test_job_numbers() {
        let d = date!(2026 - 01 - 31);
        assert_eq!(sequential_job_number(d, 7), "JOB-202601-007");
        assert_eq!(sequential_job_number(d, 1234), "JOB-202601-1234");
        assert!(is_job_number(&sequential_job_number(d, 42)));
        assert!(is_job_number(&random_job_number(d)));
        assert!(!is_job_number("JOB-2026-001"));
    }

    #[test]
    fn test_request_id_shape() {
        let id = new_request_id(date!(2026 - 11 - 05));
        assert!(id.starts_with("REQ20261105"));
        assert!(is_request_id(&id));
    }
}
