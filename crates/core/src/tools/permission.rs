/// Whether a tool call may run unattended or requires the dispatcher to
/// surface it for approval before applying its effect. `NeedsApproval` is
/// reserved for tools that mutate the git working tree or history
/// (`finalize_changes`, `merge_to_base`); everything investigative is
/// `ReadOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPermission {
    ReadOnly,
    NeedsApproval,
}
