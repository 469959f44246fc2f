//! Named string formats usable in `format` rules.
//!
//! Each format returns the list of human-readable problems with a value,
//! using the same message texts as the Kubernetes content validators, so
//! hand-written validators can call the `is_*` helpers directly and produce
//! identical details.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

pub const SHORT_NAME: &str = "k8s-short-name";
pub const LONG_NAME: &str = "k8s-long-name";
pub const LABEL_VALUE: &str = "k8s-label-value";
pub const UUID: &str = "k8s-uuid";
pub const IP: &str = "k8s-ip";
#[cfg(feature = "ip")]
pub const CIDR: &str = "k8s-cidr";
#[cfg(feature = "timestamps")]
pub const DATE_TIME: &str = "date-time";
#[cfg(feature = "urls")]
pub const URI: &str = "uri";
#[cfg(feature = "semver_format")]
pub const SEMVER: &str = "semver";
#[cfg(feature = "encoders")]
pub const BYTE: &str = "byte";

const DNS1123_LABEL_FMT: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";
const DNS1123_LABEL_ERR_MSG: &str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character";
const DNS1123_LABEL_MAX_LENGTH: usize = 63;

const DNS1123_SUBDOMAIN_ERR_MSG: &str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character";
const DNS1123_SUBDOMAIN_MAX_LENGTH: usize = 253;

const LABEL_VALUE_FMT: &str = "(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?";
const LABEL_VALUE_ERR_MSG: &str = "a valid label must be an empty string or consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character";
const LABEL_VALUE_MAX_LENGTH: usize = 63;

const UUID_FMT: &str = "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}";

fn dns1123_subdomain_fmt() -> String {
    format!("{DNS1123_LABEL_FMT}(\\.{DNS1123_LABEL_FMT})*")
}

fn anchored(fmt: &str) -> Regex {
    Regex::new(&format!("^{fmt}$")).expect("format patterns are valid regular expressions")
}

static DNS1123_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| anchored(DNS1123_LABEL_FMT));
static DNS1123_SUBDOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| anchored(&dns1123_subdomain_fmt()));
static LABEL_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| anchored(LABEL_VALUE_FMT));
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| anchored(UUID_FMT));

/// A named format resolved from a rule declaration.
#[derive(Clone, Copy, Debug)]
pub struct NamedFormat {
    name: &'static str,
    check: fn(&str) -> Vec<String>,
}

impl NamedFormat {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Problems with `value`; empty when it conforms.
    pub fn validate(&self, value: &str) -> Vec<String> {
        (self.check)(value)
    }

    /// The origin tag attached to errors from this format.
    pub fn origin(&self) -> String {
        format!("format={}", self.name)
    }
}

/// Look up a format by name. Returns `None` for unknown names or for formats
/// whose cargo feature is disabled.
pub fn lookup(name: &str) -> Option<NamedFormat> {
    let (name, check): (&'static str, fn(&str) -> Vec<String>) = match name {
        SHORT_NAME => (SHORT_NAME, is_dns1123_label),
        LONG_NAME => (LONG_NAME, is_dns1123_subdomain),
        LABEL_VALUE => (LABEL_VALUE, is_label_value),
        UUID => (UUID, is_uuid),
        IP => (IP, is_ip),
        #[cfg(feature = "ip")]
        CIDR => (CIDR, is_cidr),
        #[cfg(feature = "timestamps")]
        DATE_TIME => (DATE_TIME, is_date_time),
        #[cfg(feature = "urls")]
        URI => (URI, is_uri),
        #[cfg(feature = "semver_format")]
        SEMVER => (SEMVER, is_semver),
        #[cfg(feature = "encoders")]
        BYTE => (BYTE, is_base64),
        _ => return None,
    };
    Some(NamedFormat { name, check })
}

/// `must be no more than <n> characters`
pub fn max_len_error(length: usize) -> String {
    format!("must be no more than {length} characters")
}

/// Build a regex mismatch message with examples, in the Kubernetes wording.
pub fn regex_error(msg: &str, fmt: &str, examples: &[&str]) -> String {
    if examples.is_empty() {
        return format!("{msg} (regex used for validation is '{fmt}')");
    }
    let mut out = format!("{msg} (e.g. ");
    for (i, example) in examples.iter().enumerate() {
        if i > 0 {
            out.push_str(" or ");
        }
        out.push_str(&format!("'{example}', "));
    }
    out.push_str(&format!("regex used for validation is '{fmt}')"));
    out
}

/// RFC 1123 label: at most 63 lowercase alphanumerics or '-'.
pub fn is_dns1123_label(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_LABEL_MAX_LENGTH {
        errs.push(max_len_error(DNS1123_LABEL_MAX_LENGTH));
    }
    if !DNS1123_LABEL_RE.is_match(value) {
        if DNS1123_SUBDOMAIN_RE.is_match(value) {
            errs.push("must not contain dots".to_string());
        } else {
            errs.push(regex_error(
                DNS1123_LABEL_ERR_MSG,
                DNS1123_LABEL_FMT,
                &["my-name", "123-abc"],
            ));
        }
    }
    errs
}

/// RFC 1123 subdomain: dot-separated labels, at most 253 characters.
pub fn is_dns1123_subdomain(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX_LENGTH {
        errs.push(max_len_error(DNS1123_SUBDOMAIN_MAX_LENGTH));
    }
    if !DNS1123_SUBDOMAIN_RE.is_match(value) {
        errs.push(regex_error(
            DNS1123_SUBDOMAIN_ERR_MSG,
            &dns1123_subdomain_fmt(),
            &["example.com"],
        ));
    }
    errs
}

pub fn is_label_value(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > LABEL_VALUE_MAX_LENGTH {
        errs.push(max_len_error(LABEL_VALUE_MAX_LENGTH));
    }
    if !LABEL_VALUE_RE.is_match(value) {
        errs.push(regex_error(
            LABEL_VALUE_ERR_MSG,
            LABEL_VALUE_FMT,
            &["MyValue", "my_value", "12345"],
        ));
    }
    errs
}

pub fn is_uuid(value: &str) -> Vec<String> {
    if UUID_RE.is_match(value) {
        Vec::new()
    } else {
        vec!["must be a lowercase UUID in 8-4-4-4-12 format".to_string()]
    }
}

/// IP address, rejecting zone identifiers and IPv4-mapped IPv6 forms.
pub fn is_ip(value: &str) -> Vec<String> {
    let valid = !value.contains('%')
        && match IpAddr::from_str(value) {
            Ok(IpAddr::V6(v6)) => v6.to_ipv4_mapped().is_none(),
            Ok(IpAddr::V4(_)) => true,
            Err(_) => false,
        };
    if valid {
        Vec::new()
    } else {
        vec!["must be a valid IP address, (e.g. 10.9.8.7 or 2001:db8::ffff)".to_string()]
    }
}

#[cfg(feature = "ip")]
pub fn is_cidr(value: &str) -> Vec<String> {
    match ipnet::IpNet::from_str(value) {
        Ok(_) => Vec::new(),
        Err(_) => {
            vec!["must be a valid CIDR value, (e.g. 10.9.8.0/24 or 2001:db8::/64)".to_string()]
        }
    }
}

#[cfg(feature = "timestamps")]
pub fn is_date_time(value: &str) -> Vec<String> {
    match chrono::DateTime::parse_from_rfc3339(value) {
        Ok(_) => Vec::new(),
        Err(_) => vec!["must be an RFC 3339 date-time, (e.g. 2006-01-02T15:04:05Z)".to_string()],
    }
}

#[cfg(feature = "urls")]
pub fn is_uri(value: &str) -> Vec<String> {
    match url::Url::parse(value) {
        Ok(_) => Vec::new(),
        Err(e) => vec![format!("must be a valid absolute URL: {e}")],
    }
}

#[cfg(feature = "semver_format")]
pub fn is_semver(value: &str) -> Vec<String> {
    match semver::Version::parse(value) {
        Ok(_) => Vec::new(),
        Err(_) => vec!["must be a valid semantic version, (e.g. 1.2.3 or 1.0.0-alpha.1)".to_string()],
    }
}

#[cfg(feature = "encoders")]
pub fn is_base64(value: &str) -> Vec<String> {
    use base64::Engine;
    match base64::engine::general_purpose::STANDARD.decode(value) {
        Ok(_) => Vec::new(),
        Err(_) => vec!["must be base64-encoded data".to_string()],
    }
}
