//! Failure classification: raw execution failure text → structured outcome.
//!
//! Dispatch is an ordered list of matchers, each a predicate plus an
//! extractor, evaluated in fixed priority order with the first match
//! winning. Classification never touches notebook state; the only side
//! effects are the two generative-text queries (unknown-kind tagging and
//! NameError cell lookup).

pub mod patterns;

use tracing::debug;

use crate::errors::{Error, Result};
use crate::exec::ExecResult;
use crate::llm::TextCompleter;
use crate::models::{ExecutionOutcome, ExecutionStatus};

/// Pre-extracted facts every matcher sees.
pub struct MatchContext<'a> {
    pub text: &'a str,
    pub error_token: Option<String>,
}

struct Classified {
    status: ExecutionStatus,
    /// Some kinds locate their failing cell themselves instead of using the
    /// generic marker search.
    cell_override: Option<i64>,
}

struct Matcher {
    name: &'static str,
    applies: fn(&MatchContext<'_>) -> bool,
    classify: fn(&MatchContext<'_>, &dyn TextCompleter) -> Result<Classified>,
}

/// Priority order matters: module-not-found first (its message also contains
/// an `…Error` token), the token-less case next (everything after assumes a
/// token exists), then the specific kinds, then the pass-through.
const MATCHERS: &[Matcher] = &[
    Matcher {
        name: "module_not_found",
        applies: |ctx| ctx.text.contains(patterns::NO_MODULE_MARKER),
        classify: |ctx, _| {
            let missing_module = patterns::missing_module(ctx.text).ok_or_else(|| {
                Error::Contract("module marker present but no module token".to_string())
            })?;
            Ok(Classified {
                status: ExecutionStatus::ModuleNotFound { missing_module },
                cell_override: None,
            })
        },
    },
    Matcher {
        name: "undeterminable",
        applies: |ctx| ctx.error_token.is_none(),
        classify: |ctx, completer| {
            if ctx.text.contains(patterns::DISK_FULL_MARKER) {
                return Err(Error::DiskFull(ctx.text.to_string()));
            }
            let tag = ask_error_tag(completer, ctx.text)?;
            Ok(Classified {
                status: ExecutionStatus::Unclassified { tag },
                cell_override: None,
            })
        },
    },
    Matcher {
        name: "file_not_found",
        applies: |ctx| {
            ctx.error_token.as_deref() == Some("FileNotFoundError")
                || ctx.text.contains("FileNotFoundError")
                || ctx.text.contains(patterns::PATH_NOT_FOUND_MARKER)
        },
        classify: |ctx, _| {
            let missing_path = patterns::missing_path(ctx.text).ok_or_else(|| {
                Error::Contract(format!(
                    "file-not-found dispatch but no path pattern matched: {}",
                    ctx.text
                ))
            })?;
            Ok(Classified {
                status: ExecutionStatus::FileNotFound { missing_path },
                cell_override: None,
            })
        },
    },
    Matcher {
        name: "name_error",
        applies: |ctx| {
            ctx.error_token.as_deref() == Some("NameError") || ctx.text.contains("NameError")
        },
        classify: |ctx, completer| {
            let undefined_name = patterns::undefined_name(ctx.text).ok_or_else(|| {
                Error::Contract(format!(
                    "name-error dispatch but no quoted identifier: {}",
                    ctx.text
                ))
            })?;
            let cell = ask_name_error_cell(completer, &undefined_name, ctx.text)?;
            Ok(Classified {
                status: ExecutionStatus::NameError { undefined_name },
                cell_override: Some(cell),
            })
        },
    },
    Matcher {
        name: "other",
        applies: |_| true,
        classify: |ctx, _| {
            // The token-less case was consumed above, so a token exists here.
            let error_type = ctx.error_token.clone().unwrap_or_default();
            Ok(Classified {
                status: ExecutionStatus::Other { error_type },
                cell_override: None,
            })
        },
    },
];

/// Maps one execution attempt's result to a structured outcome.
pub struct Classifier<'a> {
    completer: &'a dyn TextCompleter,
}

impl<'a> Classifier<'a> {
    pub fn new(completer: &'a dyn TextCompleter) -> Self {
        Classifier { completer }
    }

    pub fn classify(&self, result: &ExecResult, total_code_cells: i64) -> Result<ExecutionOutcome> {
        let text = match result {
            ExecResult::Completed => return Ok(ExecutionOutcome::success(total_code_cells)),
            ExecResult::TimedOut => return Ok(ExecutionOutcome::timeout(total_code_cells)),
            ExecResult::Raised(text) => text,
        };

        let ctx = MatchContext {
            text,
            error_token: patterns::error_token(text),
        };

        for matcher in MATCHERS {
            if !(matcher.applies)(&ctx) {
                continue;
            }
            debug!(matcher = matcher.name, "failure matched");
            let classified = (matcher.classify)(&ctx, self.completer)?;
            let err_cell_num = classified
                .cell_override
                .unwrap_or_else(|| patterns::cell_index(text));
            return Ok(ExecutionOutcome::new(
                classified.status,
                total_code_cells,
                err_cell_num,
            ));
        }

        unreachable!("the pass-through matcher accepts everything");
    }
}

/// One-word error tag for a failure with no recognisable `…Error` token.
fn ask_error_tag(completer: &dyn TextCompleter, text: &str) -> Result<String> {
    let prompt = format!(
        "Identify the error name from the error report below. Format the response \
         between ``` and ```. It must be a 1-word string and nothing else. \
         No yapping.\n\n{text}"
    );
    let reply = completer.complete(&prompt)?;
    Ok(reply.replace("```", "").trim().to_string())
}

/// Failing cell of a NameError. The generic marker search is unreliable for
/// this kind, so the model is asked; its reply is parsed as a bare integer,
/// then via either `In[n]` marker form, then gives up with 0.
fn ask_name_error_cell(
    completer: &dyn TextCompleter,
    undefined_name: &str,
    text: &str,
) -> Result<i64> {
    let prompt = format!(
        "Identify the cell number where the NameError occurred due to the undefined \
         variable '{undefined_name}' in the notebook. No yapping. Give just the cell \
         number between ``` and ```.\n\n{text}"
    );
    let reply = completer.complete(&prompt)?;
    let cleaned = reply.replace("```", "").trim().to_string();
    if let Ok(n) = cleaned.parse::<i64>() {
        return Ok(n);
    }
    Ok(patterns::marker_index(&cleaned).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Completer returning canned replies in order.
    struct CannedCompleter {
        replies: parking_lot::Mutex<Vec<String>>,
    }

    impl CannedCompleter {
        fn new(replies: &[&str]) -> Self {
            CannedCompleter {
                replies: parking_lot::Mutex::new(
                    replies.iter().map(|s| s.to_string()).collect(),
                ),
            }
        }
    }

    impl TextCompleter for CannedCompleter {
        fn complete(&self, _prompt: &str) -> Result<String> {
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Ok(String::new())
            } else {
                Ok(replies.remove(0))
            }
        }
    }

    fn classify(result: ExecResult, replies: &[&str]) -> Result<ExecutionOutcome> {
        let completer = CannedCompleter::new(replies);
        Classifier::new(&completer).classify(&result, 3)
    }

    #[test]
    fn success_and_timeout_short_circuit() {
        let ok = classify(ExecResult::Completed, &[]).unwrap();
        assert_eq!(ok.status, ExecutionStatus::Success);
        assert_eq!(ok.err_cell_num, 3);

        let to = classify(ExecResult::TimedOut, &[]).unwrap();
        assert_eq!(to.status, ExecutionStatus::Timeout);
        assert_eq!(to.err_cell_num, -1);
    }

    #[test]
    fn module_not_found_extraction() {
        let text = "Error executing In[2]:\nModuleNotFoundError: No module named 'foo'\n";
        let outcome = classify(ExecResult::Raised(text.to_string()), &[]).unwrap();
        assert_eq!(
            outcome.status,
            ExecutionStatus::ModuleNotFound {
                missing_module: "foo".to_string()
            }
        );
        assert_eq!(outcome.err_cell_num, 2);
    }

    #[test]
    fn file_not_found_extraction() {
        let text = "In [1]: FileNotFoundError: [Errno 2] No such file or directory: 'input.csv'";
        let outcome = classify(ExecResult::Raised(text.to_string()), &[]).unwrap();
        assert_eq!(
            outcome.status,
            ExecutionStatus::FileNotFound {
                missing_path: "input.csv".to_string()
            }
        );
        assert_eq!(outcome.err_cell_num, 1);
    }

    #[test]
    fn file_not_found_without_extractable_path_is_contract_violation() {
        let text = "FileNotFoundError: something unusual happened";
        let err = classify(ExecResult::Raised(text.to_string()), &[]).unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn name_error_cell_from_bare_integer_reply() {
        let text = "NameError: name 'df' is not defined";
        let outcome = classify(ExecResult::Raised(text.to_string()), &["```2```"]).unwrap();
        assert_eq!(
            outcome.status,
            ExecutionStatus::NameError {
                undefined_name: "df".to_string()
            }
        );
        assert_eq!(outcome.err_cell_num, 2);
    }

    #[test]
    fn name_error_cell_from_marker_reply() {
        let text = "NameError: name 'df' is not defined";
        let outcome =
            classify(ExecResult::Raised(text.to_string()), &["the failing cell is In[3]"])
                .unwrap();
        assert_eq!(outcome.err_cell_num, 3);

        let outcome2 =
            classify(ExecResult::Raised(text.to_string()), &["see In [4] above"]).unwrap();
        assert_eq!(outcome2.err_cell_num, 4);
    }

    #[test]
    fn name_error_cell_unparseable_reply_gives_zero() {
        let text = "NameError: name 'df' is not defined";
        let outcome = classify(ExecResult::Raised(text.to_string()), &["no idea"]).unwrap();
        assert_eq!(outcome.err_cell_num, 0);
    }

    #[test]
    fn name_error_without_quoted_identifier_is_contract_violation() {
        let text = "NameError: something is not defined";
        let err = classify(ExecResult::Raised(text.to_string()), &[]).unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }

    #[test]
    fn unknown_kind_is_tagged_by_completer() {
        let text = "In[5]: the kernel exploded in an unusual way";
        let outcome = classify(ExecResult::Raised(text.to_string()), &["```Panic```"]).unwrap();
        assert_eq!(
            outcome.status,
            ExecutionStatus::Unclassified {
                tag: "Panic".to_string()
            }
        );
        assert_eq!(outcome.err_cell_num, 5);
    }

    #[test]
    fn disk_exhaustion_is_fatal() {
        let text = "OSError: [Errno 28] No space left on device";
        // An `…Error` token exists, so this routes to the pass-through;
        // the fatal case is a token-less message.
        let outcome = classify(ExecResult::Raised(text.to_string()), &[]).unwrap();
        assert_eq!(
            outcome.status,
            ExecutionStatus::Other {
                error_type: "OSError".to_string()
            }
        );

        let bare = "write failed: No space left on device";
        let err = classify(ExecResult::Raised(bare.to_string()), &[]).unwrap_err();
        assert!(matches!(err, Error::DiskFull(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn other_errors_pass_through_their_token() {
        let text = "In[2]: ZeroDivisionError: division by zero";
        let outcome = classify(ExecResult::Raised(text.to_string()), &[]).unwrap();
        assert_eq!(
            outcome.status,
            ExecutionStatus::Other {
                error_type: "ZeroDivisionError".to_string()
            }
        );
        assert_eq!(outcome.err_cell_num, 2);
    }

    #[test]
    fn ansi_remnant_is_stripped_from_token() {
        let text = "In[1]: 0;31mTypeError: unsupported operand";
        let outcome = classify(ExecResult::Raised(text.to_string()), &[]).unwrap();
        assert_eq!(
            outcome.status,
            ExecutionStatus::Other {
                error_type: "TypeError".to_string()
            }
        );
    }
}
