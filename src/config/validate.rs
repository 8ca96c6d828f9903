// src/config/validate.rs

use crate::config::model::{ConfigFile, EngineSection, RawConfigFile};
use crate::errors::{BuildGraphError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::BuildGraphError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.engine, raw.images))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    if let Some(engine) = &cfg.engine {
        validate_engine(engine)?;
    }
    validate_images(cfg)?;
    Ok(())
}

pub fn validate_engine(engine: &EngineSection) -> Result<()> {
    if engine.workers == 0 {
        return Err(BuildGraphError::ConfigError(
            "[engine].workers must be >= 1 (got 0)".to_string(),
        ));
    }

    if engine.queue_capacity == 0 {
        return Err(BuildGraphError::ConfigError(
            "[engine].queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

// Graph-level checks (duplicates, cycles, undefined references) happen when
// the definitions are inserted into the graph builder, since they span files.
fn validate_images(cfg: &RawConfigFile) -> Result<()> {
    for (name, versions) in cfg.images.iter() {
        for (version, def) in versions.iter() {
            if def.builder.trim().is_empty() {
                return Err(BuildGraphError::ConfigError(format!(
                    "image '{name}:{version}' has an empty `builder`"
                )));
            }

            let refs = def.parents.iter().chain(def.children.iter());
            for (ref_name, ref_versions) in refs {
                if ref_versions.is_empty() {
                    return Err(BuildGraphError::ConfigError(format!(
                        "image '{name}:{version}' references '{ref_name}' without any version"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::ImageDefinition;

    #[test]
    fn zero_workers_rejected() {
        let raw = RawConfigFile {
            engine: Some(EngineSection {
                workers: 0,
                ..EngineSection::default()
            }),
            images: Default::default(),
        };

        match ConfigFile::try_from(raw) {
            Err(BuildGraphError::ConfigError(msg)) => assert!(msg.contains("workers")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn reference_without_versions_rejected() {
        let mut def = ImageDefinition::default();
        def.parents.insert("base".into(), vec![]);

        let mut raw = RawConfigFile::default();
        raw.images
            .entry("app".into())
            .or_default()
            .insert("v1".into(), def);

        match ConfigFile::try_from(raw) {
            Err(BuildGraphError::ConfigError(msg)) => {
                assert!(msg.contains("app:v1"));
                assert!(msg.contains("base"));
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}
