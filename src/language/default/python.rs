use lazy_static::lazy_static;

use crate::language::spec::LanguageSpec;

lazy_static! {
  pub(crate) static ref PYTHON: LanguageSpec = LanguageSpec::new("python", "main.py")
    .image("python:3.10-alpine")
    .command("python", vec!["main.py"]);
}
