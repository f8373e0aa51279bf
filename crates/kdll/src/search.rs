//! The rule search: runs the parser state machine over a search state
//! until it reaches the terminal state or stalls.

use tracing::{debug, trace, warn};

use crate::error::KdllError;
use crate::rules::RuleTable;
use crate::state::{ParserState, SearchState, MAX_KERNELS, STATE_COUNT};

/// Upper bound on rule applications before a search is declared
/// non-terminating. Generous: a full pass over the largest filter touches
/// every state at most once per layer.
const MAX_SEARCH_STEPS: usize = STATE_COUNT * MAX_KERNELS;

/// Run the state machine to completion.
///
/// On success `search.kernels` holds the ordered component selection and
/// `search.state` is [`ParserState::End`]. A filter combination no rule
/// covers fails with [`KdllError::RuleNotFound`]; a table whose rules
/// cycle without terminating fails with [`KdllError::SearchOverrun`].
pub fn search_kernel(table: &RuleTable, search: &mut SearchState) -> Result<(), KdllError> {
    let mut steps = 0;
    while search.state != ParserState::End {
        if steps >= MAX_SEARCH_STEPS {
            return Err(KdllError::SearchOverrun {
                state: search.state,
            });
        }
        steps += 1;

        let rule = match table.find_rule(search) {
            Some(rule) => rule,
            None => {
                warn!(
                    state = ?search.state,
                    layer = search.layer_index,
                    filter = ?search.filter,
                    "no rule matches this filter combination"
                );
                return Err(KdllError::RuleNotFound {
                    state: search.state,
                });
            }
        };
        trace!(
            state = ?search.state,
            layer = search.layer_index,
            actions = rule.actions().len(),
            "rule matched"
        );
        for action in rule.actions() {
            action.apply(search)?;
        }
    }
    debug!(
        kernels = search.kernels.len(),
        patches = search.patches.len(),
        "kernel search complete"
    );
    Ok(())
}
