//! Sampler Table
//!
//! Maps InvokeAI scheduler keys onto the sampler name and schedule type that
//! Automatic1111 prints. Needs updating whenever InvokeAI adds a scheduler.

use std::collections::HashMap;
use std::fmt;

/// How a sampler derives its noise schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleType {
    Automatic,
    Karras,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleType::Automatic => f.write_str("Automatic"),
            ScheduleType::Karras => f.write_str("Karras"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerInfo {
    pub display_name: &'static str,
    pub schedule_type: ScheduleType,
}

const BUILTIN: &[(&str, &str, ScheduleType)] = &[
    ("euler", "Euler", ScheduleType::Automatic),
    ("deis", "DEIS", ScheduleType::Automatic),
    ("ddim", "DDIM", ScheduleType::Automatic),
    ("ddpm", "DDPM", ScheduleType::Automatic),
    ("dpmpp_sde", "DPM++ SDE", ScheduleType::Automatic),
    ("dpmpp_2s", "DPM++ 2S", ScheduleType::Automatic),
    ("dpmpp_2m", "DPM++ 2M", ScheduleType::Automatic),
    ("dpmpp_2m_sde", "DPM++ 2M SDE", ScheduleType::Automatic),
    ("heun", "Heun", ScheduleType::Automatic),
    ("kdpm_2", "KDPM 2", ScheduleType::Automatic),
    ("lms", "LMS", ScheduleType::Automatic),
    ("pndm", "PNDM", ScheduleType::Automatic),
    ("unipc", "UniPC", ScheduleType::Automatic),
    ("euler_k", "Euler", ScheduleType::Karras),
    ("dpmpp_sde_k", "DPM++ SDE", ScheduleType::Karras),
    ("dpmpp_2s_k", "DPM++ 2S", ScheduleType::Karras),
    ("dpmpp_2m_k", "DPM++ 2M", ScheduleType::Karras),
    ("dpmpp_3m_k", "DPM++ 3M", ScheduleType::Karras),
    ("dpmpp_2m_sde_k", "DPM++ 2M SDE", ScheduleType::Karras),
    ("heun_k", "Heun", ScheduleType::Karras),
    ("lms_k", "LMS Karras", ScheduleType::Karras),
    ("euler_a", "Euler a", ScheduleType::Automatic),
    ("kdpm_2_a", "KDPM 2a", ScheduleType::Automatic),
    ("lcm", "LCM", ScheduleType::Automatic),
    ("tcd", "TCD", ScheduleType::Automatic),
];

/// Scheduler key registry, built once and shared read-only
pub struct SamplerTable {
    samplers: HashMap<&'static str, SamplerInfo>,
}

impl SamplerTable {
    pub fn builtin() -> Self {
        let samplers = BUILTIN
            .iter()
            .map(|&(key, display_name, schedule_type)| {
                (key, SamplerInfo { display_name, schedule_type })
            })
            .collect();
        Self { samplers }
    }

    pub fn get(&self, key: &str) -> Option<&SamplerInfo> {
        self.samplers.get(key)
    }
}

impl Default for SamplerTable {
    fn default() -> Self {
        Self::builtin()
    }
}
