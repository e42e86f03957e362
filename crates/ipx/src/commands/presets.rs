//! `ipx presets` command implementation.

use clap::Args;
use ipx_core::{Preset, PresetRegistry};

use crate::output::Output;

/// Arguments for the presets command.
#[derive(Args)]
pub(crate) struct PresetsArgs;

impl PresetsArgs {
    /// Print the built-in presets.
    pub(crate) fn execute(&self) {
        let output = Output::new();
        let registry = PresetRegistry::builtin();

        output.highlight(&format!("{} presets", registry.len()));
        let mut presets = registry.list();
        presets.sort_by(|a, b| a.name.cmp(&b.name));
        for preset in presets {
            output.result(&describe(preset));
        }
    }
}

fn describe(preset: &Preset) -> String {
    let size = if preset.height == 0 {
        format!("{}w", preset.width)
    } else {
        format!("{}x{}", preset.width, preset.height)
    };
    format!(
        "{:<16} {:<10} {:<8} q{}",
        preset.name,
        size,
        preset.fit.as_str(),
        preset.quality
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipx_core::FitMode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_describe_cover() {
        let preset = Preset::new("avatar", 1000, 1000, FitMode::Cover, 85);
        assert_eq!(describe(&preset), "avatar           1000x1000  cover    q85");
    }

    #[test]
    fn test_describe_contain() {
        let preset = Preset::new("content_preview", 800, 0, FitMode::Contain, 80);
        assert_eq!(describe(&preset), "content_preview  800w       contain  q80");
    }
}
