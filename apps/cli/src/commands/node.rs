//! Node access: get, set, ls

use crate::commands::config::CliConfig;
use crate::session::ServerArgs;
use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use ziapi_sdk::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TypeArg {
    /// Double, falling back to string
    Auto,
    Double,
    Integer,
    String,
    /// Raw bytes, hex encoded on the command line
    Bytes,
}

impl TypeArg {
    fn value_type(self) -> Option<ValueType> {
        match self {
            TypeArg::Auto => None,
            TypeArg::Double => Some(ValueType::Double),
            TypeArg::Integer => Some(ValueType::Integer),
            TypeArg::String => Some(ValueType::String),
            TypeArg::Bytes => Some(ValueType::Bytes),
        }
    }
}

/// Parse a command line value. `auto` picks integer, then double, then string.
pub fn parse_value(raw: &str, ty: TypeArg) -> Result<Value> {
    Ok(match ty {
        TypeArg::Double => Value::Double(raw.trim().parse()?),
        TypeArg::Integer => Value::Integer(raw.trim().parse()?),
        TypeArg::String => Value::String(raw.to_string()),
        TypeArg::Bytes => Value::Bytes(hex::decode(raw.trim().trim_start_matches("0x"))?),
        TypeArg::Auto => {
            let trimmed = raw.trim();
            if let Ok(v) = trimmed.parse::<i64>() {
                Value::Integer(v)
            } else if let Ok(v) = trimmed.parse::<f64>() {
                Value::Double(v)
            } else {
                Value::String(raw.to_string())
            }
        },
    })
}

#[derive(Args, Debug)]
pub struct GetCommand {
    /// Node path, e.g. /dev1234/oscs/0/freq
    pub path: String,

    #[arg(short = 't', long = "type", value_enum, default_value_t = TypeArg::Auto)]
    pub ty: TypeArg,
}

impl GetCommand {
    pub fn execute(&self, server: &ServerArgs, config: &CliConfig) -> Result<()> {
        let mut conn = server.connect(config)?;
        let value = match self.ty.value_type() {
            Some(ty) => conn.get(&self.path, ty)?,
            None => match conn.get(&self.path, ValueType::Double) {
                Ok(v) => v,
                Err(_) => conn.get(&self.path, ValueType::String)?,
            },
        };
        match value {
            Value::Bytes(bytes) => println!("0x{}", hex::encode(bytes)),
            other => println!("{}", other),
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct SetCommand {
    pub path: String,

    pub value: String,

    #[arg(short = 't', long = "type", value_enum, default_value_t = TypeArg::Auto)]
    pub ty: TypeArg,

    /// Wait until the device applied the value and print what it accepted
    #[arg(long)]
    pub sync: bool,
}

impl SetCommand {
    pub fn execute(&self, server: &ServerArgs, config: &CliConfig) -> Result<()> {
        let mut conn = server.connect(config)?;
        let value = parse_value(&self.value, self.ty)?;
        let mode = if self.sync { SetMode::Sync } else { SetMode::Async };
        let outcome = conn.set(&self.path, value, mode)?;
        if let Some(applied) = outcome.effective() {
            println!("{} = {}", self.path, applied);
        } else {
            // Make sure the request reached the server before the session closes.
            conn.sync()?;
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct LsCommand {
    /// Path or wildcard pattern
    #[arg(default_value = "/")]
    pub pattern: String,

    #[arg(short, long)]
    pub recursive: bool,

    /// Leaves only
    #[arg(short, long)]
    pub leaves: bool,

    #[arg(long)]
    pub settings: bool,

    #[arg(long)]
    pub streaming: bool,

    /// Subscribed nodes only
    #[arg(long)]
    pub subscribed: bool,
}

impl LsCommand {
    pub fn flags(&self) -> ListNodesFlags {
        let mut flags = ListNodesFlags::ABSOLUTE;
        flags.set(ListNodesFlags::RECURSIVE, self.recursive);
        flags.set(ListNodesFlags::LEAVES_ONLY, self.leaves);
        flags.set(ListNodesFlags::SETTINGS_ONLY, self.settings);
        flags.set(ListNodesFlags::STREAMING_ONLY, self.streaming);
        flags.set(ListNodesFlags::SUBSCRIBED_ONLY, self.subscribed);
        flags
    }

    pub fn execute(&self, server: &ServerArgs, config: &CliConfig) -> Result<()> {
        if self.settings && self.streaming {
            bail!("--settings and --streaming exclude each other");
        }
        let mut conn = server.connect(config)?;
        let listed = conn.list_node_names(&self.pattern, self.flags())?;
        if let Some(warning) = listed.warning {
            eprintln!("warning: {:?}", warning);
        }
        for name in listed.value {
            println!("{}", name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42", TypeArg::Auto).unwrap(), Value::Integer(42));
        assert_eq!(parse_value("1e5", TypeArg::Auto).unwrap(), Value::Double(1e5));
        assert_eq!(parse_value("hello", TypeArg::Auto).unwrap(), Value::String("hello".into()));
        assert_eq!(parse_value("42", TypeArg::Double).unwrap(), Value::Double(42.0));
        assert_eq!(parse_value(" 7 ", TypeArg::String).unwrap(), Value::String(" 7 ".into()));
        assert!(parse_value("x", TypeArg::Integer).is_err());
        assert_eq!(parse_value("0x0aff", TypeArg::Bytes).unwrap(), Value::Bytes(vec![0x0a, 0xff]));
        assert!(parse_value("0xzz", TypeArg::Bytes).is_err());
    }

    #[test]
    fn test_ls_flags() {
        let ls = LsCommand {
            pattern: "/dev1".into(),
            recursive: true,
            leaves: false,
            settings: true,
            streaming: false,
            subscribed: false,
        };
        assert_eq!(
            ls.flags(),
            ListNodesFlags::ABSOLUTE | ListNodesFlags::RECURSIVE | ListNodesFlags::SETTINGS_ONLY
        );
    }
}
