use lazy_static::lazy_static;

use crate::language::spec::LanguageSpec;

lazy_static! {
  pub(crate) static ref JAVASCRIPT: LanguageSpec = LanguageSpec::new("javascript", "main.js")
    .image("node:alpine")
    .command("node", vec!["main.js"]);
}
