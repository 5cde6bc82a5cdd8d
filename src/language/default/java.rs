use lazy_static::lazy_static;

use crate::language::spec::LanguageSpec;

lazy_static! {
  pub(crate) static ref JAVA: LanguageSpec = LanguageSpec::new("java", "Main.java")
    .image("openjdk:17-alpine")
    .shell("javac Main.java && java Main");
}
