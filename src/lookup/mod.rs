pub mod rdns;
pub mod resolve;

pub use rdns::DnsLookup;
pub use resolve::resolve_target;

/// Sanitize a string for safe terminal display by removing control characters.
///
/// PTR records are attacker-controlled; this keeps escape sequences out of
/// the terminal.
pub(crate) fn sanitize_display(s: &str) -> String {
    s.chars().filter(|c| !c.is_control()).collect()
}
