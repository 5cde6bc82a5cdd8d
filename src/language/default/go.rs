use lazy_static::lazy_static;

use crate::language::spec::LanguageSpec;

lazy_static! {
  pub(crate) static ref GO: LanguageSpec = LanguageSpec::new("go", "main.go")
    .image("golang:1.20-alpine")
    .command("go", vec!["run", "main.go"]);
}
