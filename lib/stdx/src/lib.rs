//! Small helpers shared by every crate in the workspace.

mod macros;
pub mod pretty;

/// Converts `snake_case` (or `lowercase`) into `CamelCase`.
///
/// ```text
/// soft_plus -> SoftPlus
/// fmul      -> Fmul
/// ```
pub fn to_camel_case(name: &str) -> String {
    let mut res = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            res.extend(c.to_uppercase());
            upper = false;
        } else {
            res.push(c);
        }
    }
    res
}
