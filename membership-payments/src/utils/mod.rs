pub mod validation;

pub use validation::ValidatedJson;

/// Trim and drop angle brackets from free-text input.
pub fn sanitize_input(input: &str) -> String {
    input.trim().replace(['<', '>'], "")
}
