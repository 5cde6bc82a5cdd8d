use std::collections::HashMap;

use lazy_static::lazy_static;
use log::debug;

use crate::error::SnipBoxError;

pub use spec::LanguageSpec;

mod default;
mod spec;

lazy_static! {
  /// Supported languages, in the order they are listed to users
  static ref LANGUAGE_LIST: Vec<&'static LanguageSpec> = vec![
    &*default::python::PYTHON,
    &*default::go::GO,
    &*default::cpp::CPP,
    &*default::java::JAVA,
    &*default::javascript::JAVASCRIPT,
  ];

  static ref LANGUAGE_MAP: HashMap<&'static str, &'static LanguageSpec> = {
    let mut map = HashMap::new();
    for spec in LANGUAGE_LIST.iter() {
      map.insert(spec.id(), *spec);
    }
    map
  };
}

/// Look up a language by its exact identifier
pub fn resolve(language: &str) -> Result<&'static LanguageSpec, SnipBoxError> {
  match LANGUAGE_MAP.get(language) {
    Some(spec) => {
      debug!("Resolve language {} -> {}", language, spec.image_ref());
      Ok(*spec)
    }
    None => Err(SnipBoxError::unsupported_language(language)),
  }
}

/// Identifiers of all supported languages
pub fn languages() -> Vec<&'static str> {
  LANGUAGE_LIST.iter().map(|spec| spec.id()).collect()
}
