use std::env;
use std::str::FromStr;

use flexi_logger::DeferredNow;
use log::{error, Record};

use crate::SnipBoxError;

/// A logline-formatter that produces log lines like <br>
/// ```[datetime: INFO] Workspace codeexec-a1b2c3 released```
pub fn default_format(
  w: &mut dyn std::io::Write,
  now: &mut DeferredNow,
  record: &Record,
) -> Result<(), std::io::Error> {
  write!(
    w,
    "[{}: {:5}] {}",
    now.format("%Y-%m-%d %H:%M:%S"),
    record.level(),
    record.args()
  )
}

/// Read an optional environment variable and parse it
pub(crate) fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, SnipBoxError> {
  match env::var(key) {
    Ok(text) if text.trim().is_empty() => Ok(None),
    Ok(text) => match text.trim().parse::<T>() {
      Ok(value) => Ok(Some(value)),
      Err(_) => {
        error!("Wrong environment variable {} = {}", key, text);
        Err(SnipBoxError::configuration(format!(
          "environment variable {} has malformed value {:?}",
          key, text
        )))
      }
    },
    Err(_) => Ok(None),
  }
}

/// Cut a byte buffer into text, replacing invalid UTF-8
pub(crate) fn into_text(bytes: Vec<u8>) -> String {
  match String::from_utf8(bytes) {
    Ok(text) => text,
    Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
  }
}
