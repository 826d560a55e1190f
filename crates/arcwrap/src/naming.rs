/// Diagnostics the tool prints when a member name cannot exist on the host
/// file system. Matched case-insensitively.
pub const NAMING_PHRASES: &[&str] = &[
    "cannot create",
    "cannot use name",
    "invalid name",
    "the filename, directory name, or volume label syntax is incorrect",
    "the system cannot find the path specified",
    "cannot find the path",
    "access is denied",
    "filename too long",
    "illegal characters in name",
];

/// Whether any diagnostic line reports a file naming failure.
pub fn is_naming_failure<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|line| {
        let line = line.as_ref().to_lowercase();
        NAMING_PHRASES.iter().any(|phrase| line.contains(phrase))
    })
}
