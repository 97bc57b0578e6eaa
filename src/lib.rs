pub mod driver;
pub mod engine;
pub mod error;
pub mod logbuf;
pub mod sink;
pub mod test_util;
pub mod wire;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
