//! Module kinds and their default parameters

use std::fmt;
use std::str::FromStr;
use ziapi_protocol::Value;

/// The ten module kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Sweeper,
    Recorder,
    SpectrumZoomFft,
    DeviceSettings,
    PidAdvisor,
    AwgCompiler,
    ImpedanceCompensation,
    ScopeAssembler,
    MultiDeviceSync,
    DataAcquisition,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 10] = [
        ModuleKind::Sweeper,
        ModuleKind::Recorder,
        ModuleKind::SpectrumZoomFft,
        ModuleKind::DeviceSettings,
        ModuleKind::PidAdvisor,
        ModuleKind::AwgCompiler,
        ModuleKind::ImpedanceCompensation,
        ModuleKind::ScopeAssembler,
        ModuleKind::MultiDeviceSync,
        ModuleKind::DataAcquisition,
    ];

    /// Stable name, also the parameter namespace prefix.
    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Sweeper => "sweep",
            ModuleKind::Recorder => "record",
            ModuleKind::SpectrumZoomFft => "zoomFFT",
            ModuleKind::DeviceSettings => "deviceSettings",
            ModuleKind::PidAdvisor => "pidAdvisor",
            ModuleKind::AwgCompiler => "awgModule",
            ModuleKind::ImpedanceCompensation => "impedanceModule",
            ModuleKind::ScopeAssembler => "scopeModule",
            ModuleKind::MultiDeviceSync => "multiDeviceSyncModule",
            ModuleKind::DataAcquisition => "dataAcquisitionModule",
        }
    }

    /// Kinds that accept a software trigger while executing.
    pub fn supports_trigger(self) -> bool {
        matches!(self, ModuleKind::Recorder | ModuleKind::DataAcquisition)
    }

    /// Parameters seeded on creation.
    pub fn default_params(self) -> Vec<(&'static str, Value)> {
        let mut params = vec![("directory", Value::String(".".to_string()))];
        match self {
            ModuleKind::Sweeper => params.extend([
                ("gridnode", Value::String(String::new())),
                ("start", Value::Double(1e3)),
                ("stop", Value::Double(1e6)),
                ("samplecount", Value::Integer(100)),
                ("xmapping", Value::Integer(0)),
                ("scan", Value::Integer(0)),
                ("settling/time", Value::Double(0.0)),
                ("averaging/sample", Value::Integer(1)),
                ("loopcount", Value::Integer(1)),
            ]),
            ModuleKind::Recorder | ModuleKind::DataAcquisition => params.extend([
                ("trigger/type", Value::Integer(0)),
                ("trigger/node", Value::String(String::new())),
                ("trigger/level", Value::Double(0.0)),
                ("trigger/edge", Value::Integer(1)),
                ("duration", Value::Double(0.1)),
                ("count", Value::Integer(1)),
                ("endless", Value::Integer(0)),
            ]),
            ModuleKind::ScopeAssembler => params.extend([
                ("averager/count", Value::Integer(1)),
                ("historylength", Value::Integer(100)),
            ]),
            ModuleKind::SpectrumZoomFft => params.extend([
                ("grid/cols", Value::Integer(256)),
                ("window", Value::Integer(1)),
                ("loopcount", Value::Integer(1)),
                ("absolute", Value::Integer(0)),
            ]),
            ModuleKind::PidAdvisor => params.extend([
                ("pid/p", Value::Double(1.0)),
                ("pid/i", Value::Double(10.0)),
                ("pid/d", Value::Double(0.0)),
                ("bode/start", Value::Double(1.0)),
                ("bode/stop", Value::Double(1e5)),
                ("bode/points", Value::Integer(100)),
            ]),
            ModuleKind::DeviceSettings => params.extend([
                ("command", Value::String("save".to_string())),
                ("device", Value::String(String::new())),
                ("filename", Value::String("settings".to_string())),
            ]),
            ModuleKind::AwgCompiler | ModuleKind::ImpedanceCompensation => {
                params.push(("duration", Value::Double(0.0)))
            },
            ModuleKind::MultiDeviceSync => params.extend([
                ("duration", Value::Double(0.0)),
                ("devices", Value::String(String::new())),
            ]),
        }
        params
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for an unknown module name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown module kind: {0}")]
pub struct UnknownModuleKind(pub String);

impl FromStr for ModuleKind {
    type Err = UnknownModuleKind;

    /// Case-insensitive match on the stable name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownModuleKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique_and_parse_back() {
        let mut names: Vec<_> = ModuleKind::ALL.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 10);
        for kind in ModuleKind::ALL {
            assert_eq!(kind.name().parse::<ModuleKind>(), Ok(kind));
        }
        assert_eq!("ZOOMFFT".parse::<ModuleKind>(), Ok(ModuleKind::SpectrumZoomFft));
        assert!("lockin".parse::<ModuleKind>().is_err());
    }

    #[test]
    fn test_trigger_support() {
        let triggered: Vec<_> = ModuleKind::ALL
            .into_iter()
            .filter(|k| k.supports_trigger())
            .collect();
        assert_eq!(triggered, vec![ModuleKind::Recorder, ModuleKind::DataAcquisition]);
    }

    #[test]
    fn test_every_kind_has_a_directory() {
        for kind in ModuleKind::ALL {
            assert!(kind.default_params().iter().any(|(k, _)| *k == "directory"));
        }
    }
}
