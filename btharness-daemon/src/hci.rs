/*!
 * HCI Command Table
 * Static controller command descriptors and the hcitool executor
 */

use std::collections::BTreeMap;
use std::io;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamKind {
    /// Numeric value written little-endian into `octets` bytes.
    Text { octets: usize },
    /// Two-octet connection handle picked from the live connections.
    HandleSelector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: &'static str,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub group: &'static str,
    pub name: &'static str,
    pub ogf: u8,
    pub ocf: u16,
    pub params: &'static [ParamSpec],
}

/// Owned copy of a table row for listing over IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub group: String,
    pub name: String,
    pub ogf: u8,
    pub ocf: u16,
    pub params: Vec<ParamInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub default: String,
    #[serde(flatten)]
    pub kind: ParamKind,
}

impl From<&CommandSpec> for CommandInfo {
    fn from(spec: &CommandSpec) -> Self {
        Self {
            group: spec.group.to_string(),
            name: spec.name.to_string(),
            ogf: spec.ogf,
            ocf: spec.ocf,
            params: spec
                .params
                .iter()
                .map(|param| ParamInfo {
                    name: param.name.to_string(),
                    default: param.default.to_string(),
                    kind: param.kind,
                })
                .collect(),
        }
    }
}

const fn text(name: &'static str, default: &'static str, octets: usize) -> ParamSpec {
    ParamSpec {
        name,
        default,
        kind: ParamKind::Text { octets },
    }
}

const HANDLE: ParamSpec = ParamSpec {
    name: "Connection_Handle",
    default: "",
    kind: ParamKind::HandleSelector,
};

const fn command(
    group: &'static str,
    name: &'static str,
    ogf: u8,
    ocf: u16,
    params: &'static [ParamSpec],
) -> CommandSpec {
    CommandSpec {
        group,
        name,
        ogf,
        ocf,
        params,
    }
}

const LINK_CONTROL: &str = "Link Control";
const LINK_POLICY: &str = "Link Policy";
const BASEBAND: &str = "Controller & Baseband";
const INFORMATIONAL: &str = "Informational Parameters";
const STATUS: &str = "Status Parameters";

pub static COMMANDS: &[CommandSpec] = &[
    command(
        LINK_CONTROL,
        "Inquiry",
        0x01,
        0x0001,
        &[
            text("LAP", "0x9E8B33", 3),
            text("Inquiry_Length", "0x08", 1),
            text("Num_Responses", "0x00", 1),
        ],
    ),
    command(LINK_CONTROL, "Inquiry Cancel", 0x01, 0x0002, &[]),
    command(
        LINK_CONTROL,
        "Disconnect",
        0x01,
        0x0006,
        &[HANDLE, text("Reason", "0x13", 1)],
    ),
    command(LINK_CONTROL, "Read Remote Supported Features", 0x01, 0x001B, &[HANDLE]),
    command(LINK_CONTROL, "Read Remote Version Information", 0x01, 0x001D, &[HANDLE]),
    command(LINK_POLICY, "Role Discovery", 0x02, 0x0009, &[HANDLE]),
    command(LINK_POLICY, "Read Link Policy Settings", 0x02, 0x000C, &[HANDLE]),
    command(
        LINK_POLICY,
        "Write Link Policy Settings",
        0x02,
        0x000D,
        &[HANDLE, text("Link_Policy_Settings", "0x0005", 2)],
    ),
    command(BASEBAND, "Reset", 0x03, 0x0003, &[]),
    command(BASEBAND, "Read Local Name", 0x03, 0x0014, &[]),
    command(BASEBAND, "Read Page Timeout", 0x03, 0x0017, &[]),
    command(
        BASEBAND,
        "Write Page Timeout",
        0x03,
        0x0018,
        &[text("Page_Timeout", "0x2000", 2)],
    ),
    command(BASEBAND, "Read Scan Enable", 0x03, 0x0019, &[]),
    command(
        BASEBAND,
        "Write Scan Enable",
        0x03,
        0x001A,
        &[text("Scan_Enable", "0x03", 1)],
    ),
    command(BASEBAND, "Read Class of Device", 0x03, 0x0023, &[]),
    command(
        BASEBAND,
        "Write Class of Device",
        0x03,
        0x0024,
        &[text("Class_Of_Device", "0x200404", 3)],
    ),
    command(INFORMATIONAL, "Read Local Version Information", 0x04, 0x0001, &[]),
    command(INFORMATIONAL, "Read Local Supported Features", 0x04, 0x0003, &[]),
    command(INFORMATIONAL, "Read Buffer Size", 0x04, 0x0005, &[]),
    command(INFORMATIONAL, "Read BD_ADDR", 0x04, 0x0009, &[]),
    command(STATUS, "Read Link Quality", 0x05, 0x0003, &[HANDLE]),
    command(STATUS, "Read RSSI", 0x05, 0x0005, &[HANDLE]),
];

#[derive(Debug, Error)]
pub enum HciError {
    #[error("unknown HCI command: {group} / {command}")]
    UnknownCommand { group: String, command: String },
    #[error("invalid value {value:?} for {param}")]
    InvalidValue { param: String, value: String },
    #[error("{param} needs {octets} octet(s), {value:?} does not fit")]
    Overflow {
        param: String,
        value: String,
        octets: usize,
    },
    #[error("no connection handle for {0:?}")]
    UnknownHandle(String),
    #[error("{0} needs a connection handle")]
    MissingHandle(String),
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },
}

/// Group names in table order.
pub fn groups() -> Vec<&'static str> {
    let mut groups: Vec<&'static str> = Vec::new();
    for spec in COMMANDS {
        if !groups.contains(&spec.group) {
            groups.push(spec.group);
        }
    }
    groups
}

/// Commands of `group`, or the whole table when no group is given.
pub fn list(group: Option<&str>) -> Vec<CommandInfo> {
    COMMANDS
        .iter()
        .filter(|spec| group.map_or(true, |group| spec.group.eq_ignore_ascii_case(group)))
        .map(CommandInfo::from)
        .collect()
}

pub fn find(group: &str, command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| {
        spec.group.eq_ignore_ascii_case(group) && spec.name.eq_ignore_ascii_case(command)
    })
}

fn parse_number(param: &str, value: &str) -> Result<u64, HciError> {
    let trimmed = value.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed.map_err(|_| HciError::InvalidValue {
        param: param.to_string(),
        value: value.to_string(),
    })
}

fn encode_le(param: &str, value: &str, octets: usize) -> Result<Vec<u8>, HciError> {
    let number = parse_number(param, value)?;
    if octets < 8 && number >> (octets * 8) != 0 {
        return Err(HciError::Overflow {
            param: param.to_string(),
            value: value.to_string(),
            octets,
        });
    }
    Ok(number.to_le_bytes().into_iter().take(octets).collect())
}

/// Parse `hcitool con` output into `address -> handle`.
///
/// ```text
/// Connections:
///     < ACL AA:BB:CC:DD:EE:FF handle 11 state 1 lm MASTER AUTH ENCRYPT
/// ```
pub fn parse_connection_handles(output: &str) -> BTreeMap<String, u16> {
    let mut handles = BTreeMap::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(pos) = fields.iter().position(|field| *field == "handle") else {
            continue;
        };
        let (Some(address), Some(handle)) = (pos.checked_sub(1).and_then(|i| fields.get(i)), fields.get(pos + 1)) else {
            continue;
        };
        if let Ok(handle) = handle.parse::<u16>() {
            handles.insert(address.to_uppercase(), handle);
        }
    }
    handles
}

fn resolve_handle(
    param: &str,
    selected: Option<&str>,
    handles: &BTreeMap<String, u16>,
) -> Result<u16, HciError> {
    let selected = match selected.map(str::trim).filter(|value| !value.is_empty()) {
        Some(selected) => selected,
        None => {
            // A single live connection is unambiguous.
            return match handles.values().collect::<Vec<_>>().as_slice() {
                [only] => Ok(**only),
                _ => Err(HciError::MissingHandle(param.to_string())),
            };
        }
    };

    if let Some(handle) = handles.get(&selected.to_uppercase()) {
        return Ok(*handle);
    }
    let number = parse_number(param, selected).map_err(|_| HciError::UnknownHandle(selected.to_string()))?;
    u16::try_from(number).map_err(|_| HciError::UnknownHandle(selected.to_string()))
}

/// Parameter bytes for `spec`, caller values taking precedence over defaults.
pub fn encode_params(
    spec: &CommandSpec,
    values: &BTreeMap<String, String>,
    handles: &BTreeMap<String, u16>,
) -> Result<Vec<u8>, HciError> {
    let mut bytes = Vec::new();
    for param in spec.params {
        let supplied = values.get(param.name).map(String::as_str);
        match param.kind {
            ParamKind::Text { octets } => {
                bytes.extend(encode_le(param.name, supplied.unwrap_or(param.default), octets)?);
            }
            ParamKind::HandleSelector => {
                let handle = resolve_handle(param.name, supplied, handles)?;
                bytes.extend(handle.to_le_bytes());
            }
        }
    }
    Ok(bytes)
}

/// Argument vector for `<tool> -i <hci> cmd <ogf> <ocf> <bytes...>`.
pub fn command_args(interface: &str, spec: &CommandSpec, params: &[u8]) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        interface.to_string(),
        "cmd".to_string(),
        format!("0x{:02x}", spec.ogf),
        format!("0x{:04x}", spec.ocf),
    ];
    args.extend(params.iter().map(|byte| format!("0x{:02x}", byte)));
    args
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HciOutput {
    pub command: String,
    pub args: Vec<String>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct HciExecutor {
    tool: String,
    interface: String,
}

impl HciExecutor {
    pub fn new(tool: &str, interface: &str) -> Self {
        Self {
            tool: tool.to_string(),
            interface: interface.to_string(),
        }
    }

    fn output(&self, args: &[String]) -> Result<std::process::Output, HciError> {
        debug!("{} {}", self.tool, args.join(" "));
        Command::new(&self.tool)
            .args(args)
            .output()
            .map_err(|source| HciError::Spawn {
                tool: self.tool.clone(),
                source,
            })
    }

    pub fn connection_handles(&self) -> Result<BTreeMap<String, u16>, HciError> {
        let args = vec!["-i".to_string(), self.interface.clone(), "con".to_string()];
        let output = self.output(&args)?;
        Ok(parse_connection_handles(&String::from_utf8_lossy(&output.stdout)))
    }

    pub fn run(
        &self,
        group: &str,
        command: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<HciOutput, HciError> {
        let spec = find(group, command).ok_or_else(|| HciError::UnknownCommand {
            group: group.to_string(),
            command: command.to_string(),
        })?;

        let handles = if spec
            .params
            .iter()
            .any(|param| param.kind == ParamKind::HandleSelector)
        {
            self.connection_handles()?
        } else {
            BTreeMap::new()
        };

        let params = encode_params(spec, values, &handles)?;
        let args = command_args(&self.interface, spec, &params);
        let output = self.output(&args)?;
        info!("HCI {} on {} exited with {}", spec.name, self.interface, output.status);

        Ok(HciOutput {
            command: spec.name.to_string(),
            args,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
