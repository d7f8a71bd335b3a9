//! Missing-dependency repair: install the reported module, and when that
//! fails ask the generative-text collaborator for the real package name and
//! retry exactly once.

use tracing::{info, warn};

use crate::errors::Result;
use crate::llm::{extract_backtick_token, TextCompleter};
use crate::pkg::PackageInstaller;

/// Outcome of one missing-module repair attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleFixResult {
    /// The reported name installed directly.
    Installed { module: String },
    /// The corrected name installed after the direct attempt failed.
    Corrected { module: String },
    /// The collaborator declined to suggest a name; the loop proceeds and
    /// the repetition guard ends it if the failure recurs.
    NoCorrection,
    /// The corrected name failed to install as well; loop-breaking.
    RetryFailed { module: String },
}

impl ModuleFixResult {
    /// Whether the collaborator was consulted.
    pub fn consulted_llm(&self) -> bool {
        !matches!(self, ModuleFixResult::Installed { .. })
    }
}

/// Importable names are dotted; installable ones are not. `pandas.io` and
/// `pandas` both install as `pandas`.
pub fn root_package(raw: &str) -> String {
    raw.trim()
        .split('.')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub struct ModuleFix<'a> {
    installer: &'a dyn PackageInstaller,
    completer: &'a dyn TextCompleter,
}

impl<'a> ModuleFix<'a> {
    pub fn new(installer: &'a dyn PackageInstaller, completer: &'a dyn TextCompleter) -> Self {
        ModuleFix {
            installer,
            completer,
        }
    }

    /// Install `module` (already reduced to its root). On failure, ask for a
    /// corrected package name and retry that name once.
    pub fn apply(&self, module: &str) -> Result<ModuleFixResult> {
        info!(module, "installing missing module");
        if self.installer.install(module)? == 0 {
            return Ok(ModuleFixResult::Installed {
                module: module.to_string(),
            });
        }

        let corrected = match self.ask_corrected_name(module)? {
            Some(name) => name,
            None => {
                warn!(module, "no corrected package name suggested");
                return Ok(ModuleFixResult::NoCorrection);
            }
        };

        info!(module, corrected = %corrected, "retrying install with corrected name");
        if self.installer.install(&corrected)? == 0 {
            Ok(ModuleFixResult::Corrected { module: corrected })
        } else {
            warn!(module, corrected = %corrected, "corrected name failed to install");
            Ok(ModuleFixResult::RetryFailed { module: corrected })
        }
    }

    fn ask_corrected_name(&self, module: &str) -> Result<Option<String>> {
        let prompt = format!(
            "Fix ModuleNotFoundError for module `{module}`. Provide the exact open-source \
             module name to install using pip, formatted as `module_name`. Format the \
             correct module name exactly between ` and ` in 1 line. If no module is \
             found, return `None`. Do not generate a random module name. No fluff."
        );
        let reply = self.completer.complete(&prompt)?;
        Ok(extract_backtick_token(&reply)
            .map(|token| root_package(&token))
            .filter(|token| !token.is_empty()))
    }
}
