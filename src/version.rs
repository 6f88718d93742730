// Crate identity baked in at build time; served on GET / and /version, logged at startup

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `"<name> <version>"`, the plain-text body of GET /.
pub fn banner() -> String {
    format!("{NAME} {VERSION}")
}
