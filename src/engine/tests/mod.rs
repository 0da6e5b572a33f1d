pub mod helpers;

mod tests_close;
mod tests_put_get;
mod tests_recovery;
