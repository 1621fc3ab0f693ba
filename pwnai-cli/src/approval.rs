// pwnai-cli/src/approval.rs
use colored::*;
use dialoguer::{Confirm, theme::ColorfulTheme};
use pwnai_core::async_trait;
use pwnai_core::tools::lifecycle::{ApprovalDecision, ApprovalRequest, ToolApprover};
use tracing::{info, warn};

/// Asks the operator on the terminal before a gated tool runs.
pub struct CliApprover;

fn prompt_text(request: &ApprovalRequest) -> String {
    format!(
        "{} wants to run: {}\n  {}\nAllow?",
        request.tool_name, request.description, request.reason
    )
}

#[async_trait]
impl ToolApprover for CliApprover {
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalDecision {
        let prompt = prompt_text(request);
        println!();
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(true)) => {
                info!(tool_call_id = %request.tool_call_id, tool_name = %request.tool_name, "Operator approved tool call");
                ApprovalDecision::Approved
            }
            Ok(Ok(false)) => {
                info!(tool_call_id = %request.tool_call_id, tool_name = %request.tool_name, "Operator denied tool call");
                println!("{}", "Denied.".yellow());
                ApprovalDecision::Denied
            }
            Ok(Err(e)) => {
                warn!(tool_call_id = %request.tool_call_id, error = %e, "Approval prompt failed, denying");
                ApprovalDecision::Denied
            }
            Err(e) => {
                warn!(tool_call_id = %request.tool_call_id, error = %e, "Approval task failed, denying");
                ApprovalDecision::Denied
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_mentions_tool_and_reason() {
        let request = ApprovalRequest {
            tool_call_id: "toolu_1".into(),
            tool_name: "term_run_command".into(),
            reason: "Dangerous command detected: rm -rf".into(),
            description: "running \"rm -rf /tmp/x\"".into(),
        };
        let text = prompt_text(&request);
        assert!(text.starts_with("term_run_command wants to run: running"));
        assert!(text.contains("Dangerous command detected"));
    }
}
