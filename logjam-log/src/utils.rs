use std::error::Error;
use std::fmt;

/// Returns `true` if backtrace printing is enabled.
///
/// # Example
///
/// ```
/// if logjam_log::backtrace_enabled() {
///     logjam_log::debug!("backtraces are on");
/// }
/// ```
pub fn backtrace_enabled() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_ref().map(String::as_str),
        Ok("1") | Ok("full")
    )
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
///
/// Prefer to use [`logjam_log::error`](crate::error) over this function whenever possible. This
/// function is intended to be used during startup, where initializing the logger may fail or when
/// errors need to be logged before the logger has been initialized.
///
/// # Example
///
/// ```
/// if let Err(error) = std::env::var("LOGJAM_CONFIG") {
///     let error: Box<dyn std::error::Error> = error.into();
///     logjam_log::ensure_error(&error);
/// }
/// ```
#[allow(clippy::print_stderr)]
pub fn ensure_error<E: AsRef<dyn Error>>(error: E) {
    if tracing::dispatcher::has_been_set() {
        tracing::error!("{}", LogError(error.as_ref()));
    } else {
        eprintln!("error: {}", LogError(error.as_ref()));
    }
}

/// A wrapper around an [`Error`] that prints its causes.
///
/// # Example
///
/// ```
/// use logjam_log::LogError;
///
/// if let Err(error) = std::env::var("FOO") {
///     logjam_log::error!("env failed: {}", LogError(&error));
/// }
/// ```
pub struct LogError<'a, E: Error + ?Sized>(pub &'a E);

impl<E: Error + ?Sized> fmt::Display for LogError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(s) = source {
            write!(f, "\n  caused by: {s}")?;
            source = s.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug)]
    struct Outer(io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("could not fetch streams")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_log_error_prints_causes() {
        let error = Outer(io::Error::new(io::ErrorKind::Other, "connection refused"));
        assert_eq!(
            LogError(&error).to_string(),
            "could not fetch streams\n  caused by: connection refused"
        );
    }

    #[test]
    fn test_ensure_error_boxed() {
        let error = Outer(io::Error::new(io::ErrorKind::Other, "connection refused"));
        let boxed: Box<dyn Error> = Box::new(error);
        ensure_error(&boxed);

        let boxed: Box<dyn Error + Send + Sync> = "no config".into();
        ensure_error(boxed as Box<dyn Error>);
    }
}
