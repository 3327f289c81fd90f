pub mod progress_runner;


pub use progress_runner::{parse_bytes_token, OutputObserver, ProgressRunner};
