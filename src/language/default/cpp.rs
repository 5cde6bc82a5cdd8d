use lazy_static::lazy_static;

use crate::language::spec::LanguageSpec;

lazy_static! {
  // cpp-compiler-alpine is built locally, it is not on any public registry
  pub(crate) static ref CPP: LanguageSpec = LanguageSpec::new("cpp", "main.cpp")
    .image("cpp-compiler-alpine")
    .shell("g++ -o main main.cpp && ./main");
}
