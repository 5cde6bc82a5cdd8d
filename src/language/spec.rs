/// How to materialize and run one language's source in the isolated runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
  id: String,
  source_filename: String,
  image: String,
  command: Vec<String>,
}

impl LanguageSpec {
  pub(crate) fn new<IS: Into<String>, FS: Into<String>>(id: IS, source_filename: FS) -> Self {
    LanguageSpec {
      id: id.into(),
      source_filename: source_filename.into(),
      image: String::new(),
      command: vec![],
    }
  }

  pub(crate) fn image<IS: Into<String>>(mut self, image: IS) -> Self {
    self.image = image.into();
    self
  }

  pub(crate) fn command<PS: Into<String>, AS: Into<String>>(
    mut self,
    program: PS,
    arguments: Vec<AS>,
  ) -> Self {
    self.command = vec![program.into()];
    self
      .command
      .extend(arguments.into_iter().map(|a| a.into()));
    self
  }

  /// Compile and run through `sh -c`
  pub(crate) fn shell<SS: Into<String>>(self, script: SS) -> Self {
    self.command("sh", vec!["-c".to_string(), script.into()])
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn source_filename(&self) -> &str {
    &self.source_filename
  }

  pub fn image_ref(&self) -> &str {
    &self.image
  }

  pub fn build_and_run_command(&self) -> &[String] {
    &self.command
  }
}
