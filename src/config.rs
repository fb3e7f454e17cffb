// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
mod error;
mod output;
mod player;
mod surface;

pub use self::error::ConfigError;
pub use self::output::{Output, Preset, Resolution};
pub use self::player::{Listen, Player, PreviewLayout, Protocol, Stage};
pub use self::surface::{Surface, SurfaceKind};

/// The most outputs a player drives.
pub const MAX_OUTPUTS: usize = 2;

#[cfg(test)]
mod test {
    use std::{error::Error, fs, path::Path, time::Duration};

    use tempfile::tempdir;

    use crate::{
        dmx::GroupError,
        output::{BlackoutPolicy, ModeEncoding},
        router::Mode,
        surface::{DisplayTarget, Orientation, Position, Size},
    };

    use super::{ConfigError, Player, PreviewLayout, Protocol, Stage, SurfaceKind};

    fn load(yaml: &str) -> Result<Player, ConfigError> {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("dmxplay.yaml");
        fs::write(&path, yaml).expect("write config");
        Player::deserialize(&path)
    }

    #[test]
    fn test_full_config() -> Result<(), Box<dyn Error>> {
        let player = load(
            r#"
            universe: 3
            source: listen
            stage: preview
            preview_layout: stacked
            coalesce_window: 40ms
            mode_encoding: three-value
            blackout: pause
            listen:
              protocol: osc
              port: 9000
            surface:
              kind: mock
              displays:
                - { name: Main, x: 0, y: 0, width: 1920, height: 1080 }
                - { name: Side, x: 1920, y: 0, width: 1080, height: 1920 }
            outputs:
              - name: Left
                start_channel: 1
                media_folder: /shows/left
                display: 2
                resolution: 4k
                orientation: vertical
                position: { x: 10, y: 20 }
              - name: Right
                enabled: false
                start_channel: 4
                media_folder: /shows/right
                resolution: { width: 1280, height: 720 }
            "#,
        )?;

        assert_eq!(3, player.universe());
        assert_eq!(Mode::Listen, player.source());
        assert_eq!(Stage::Preview, player.stage());
        assert_eq!(PreviewLayout::Stacked, player.preview_layout());
        assert_eq!(Duration::from_millis(40), player.coalesce_window()?);
        assert_eq!(ModeEncoding::ThreeValue, player.policy().encoding);
        assert_eq!(BlackoutPolicy::Pause, player.policy().blackout);
        assert_eq!(Protocol::Osc, player.listen().protocol());
        assert_eq!(9000, player.listen().port());

        let surface = player.surface();
        assert_eq!(SurfaceKind::Mock, surface.kind());
        assert_eq!(2, surface.displays().len());
        assert_eq!("Side", surface.displays()[1].name);

        let outputs = player.outputs();
        assert_eq!(2, outputs.len());

        let left = &outputs[0];
        assert_eq!("Left", left.name(0));
        assert!(left.enabled());
        assert_eq!(3, left.group()?.mode_channel());
        assert_eq!(Path::new("/shows/left"), left.media_folder());
        assert_eq!(DisplayTarget(1), left.display());
        assert_eq!(Orientation::Vertical, left.orientation());
        assert_eq!(
            Size {
                width: 2160,
                height: 3840
            },
            left.size()
        );
        assert_eq!(Some(Position { x: 10, y: 20 }), left.position());

        let right = &outputs[1];
        assert!(!right.enabled());
        assert_eq!(DisplayTarget(0), right.display());
        assert_eq!(
            Size {
                width: 1280,
                height: 720
            },
            right.size()
        );
        Ok(())
    }

    #[test]
    fn test_defaults() -> Result<(), Box<dyn Error>> {
        let player = load(
            r#"
            outputs:
              - start_channel: 10
                media_folder: media
            "#,
        )?;

        assert_eq!(1, player.universe());
        assert_eq!(Mode::Test, player.source());
        assert_eq!(Stage::Production, player.stage());
        assert_eq!(Duration::from_millis(25), player.coalesce_window()?);
        assert_eq!(ModeEncoding::TwoBand, player.policy().encoding);
        assert_eq!(BlackoutPolicy::KeepPlaying, player.policy().blackout);
        assert_eq!(Protocol::Sacn, player.listen().protocol());
        assert_eq!(5568, player.listen().port());
        assert_eq!(SurfaceKind::Jsonl, player.surface().kind());
        assert_eq!(1, player.surface().displays().len());

        let output = &player.outputs()[0];
        assert_eq!("Output 1", output.name(0));
        assert!(output.enabled());
        assert_eq!(
            Size {
                width: 1920,
                height: 1080
            },
            output.size()
        );
        assert_eq!(None, output.position());
        Ok(())
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            load(
                r#"
                outputs:
                  - { start_channel: 1, media_folder: a }
                  - { start_channel: 4, media_folder: b }
                  - { start_channel: 7, media_folder: c }
                "#
            ),
            Err(ConfigError::TooManyOutputs(3))
        ));

        match load(
            r#"
            outputs:
              - { name: Edge, start_channel: 511, media_folder: a }
            "#,
        ) {
            Err(ConfigError::Group { output, source }) => {
                assert_eq!("Edge", output);
                assert_eq!(GroupError::OutOfRange(511), source);
            }
            other => panic!("expected a group error, got {:?}", other.map(|_| ())),
        }

        assert!(matches!(
            load("universe: 0\n"),
            Err(ConfigError::Universe(0))
        ));
        assert!(matches!(
            load("coalesce_window: soon\n"),
            Err(ConfigError::Duration(_))
        ));
        assert!(matches!(
            load("mode_encoding: four-value\n"),
            Err(ConfigError::Load(_))
        ));
        assert!(matches!(
            load("outputs: []\nstage: backstage\n"),
            Err(ConfigError::Load(_))
        ));
    }
}
