//! Entry-point discovery for hosting tools.
//!
//! An application describes its entry points in a [`HostingAssembly`]:
//! exactly one [`DotvvmStartup`] that can be constructed without arguments,
//! and at most one service configurator exposing `configure_services`.
//! Tooling (the CLI, the dev server) builds the application's configuration
//! from it with [`get_configuration`].

use crate::config::{DotvvmConfiguration, DotvvmConfigurationBuilder, ServiceCollection};
use crate::error::{ConfigurationError, StartupError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const CLI_DIRECTORY_NAME: &str = ".dotvvm";

/// Application entry point that fills in the configuration.
pub trait DotvvmStartup: Send + Sync {
    fn configure(&self, config: &mut DotvvmConfigurationBuilder, application_path: &Path);
}

pub type StartupFactory = fn() -> Box<dyn DotvvmStartup>;
pub type ConfigureServices = fn(&mut ServiceCollection);

#[derive(Debug, Clone)]
struct StartupEntry {
    name: String,
    /// `None` when the type has no parameterless construction path.
    factory: Option<StartupFactory>,
}

#[derive(Debug, Clone)]
struct ConfiguratorEntry {
    name: String,
    configure_services: Option<ConfigureServices>,
}

/// Tagged type entry scanned by [`HostingAssembly::from_registry`].
#[derive(Debug, Clone)]
pub enum RegistryEntry {
    Startup {
        name: String,
        factory: Option<StartupFactory>,
    },
    ServiceConfigurator {
        name: String,
        configure_services: Option<ConfigureServices>,
    },
    Other {
        name: String,
    },
}

/// Explicit registration of an application's entry points.
#[derive(Debug, Clone)]
pub struct HostingAssembly {
    name: String,
    startups: Vec<StartupEntry>,
    configurators: Vec<ConfiguratorEntry>,
}

impl HostingAssembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            startups: Vec::new(),
            configurators: Vec::new(),
        }
    }

    /// Builds an assembly from tagged entries; untagged entries are ignored.
    pub fn from_registry(name: impl Into<String>, entries: impl IntoIterator<Item = RegistryEntry>) -> Self {
        let mut assembly = Self::new(name);
        for entry in entries {
            match entry {
                RegistryEntry::Startup { name, factory } => {
                    assembly.startups.push(StartupEntry { name, factory });
                }
                RegistryEntry::ServiceConfigurator {
                    name,
                    configure_services,
                } => assembly.configurators.push(ConfiguratorEntry {
                    name,
                    configure_services,
                }),
                RegistryEntry::Other { name } => {
                    debug!(entry = %name, "skipping registry entry without entry-point tag");
                }
            }
        }
        assembly
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_startup(mut self, name: impl Into<String>, factory: StartupFactory) -> Self {
        self.startups.push(StartupEntry {
            name: name.into(),
            factory: Some(factory),
        });
        self
    }

    /// Startup type that needs constructor arguments; discovery skips it.
    pub fn with_startup_requiring_arguments(mut self, name: impl Into<String>) -> Self {
        self.startups.push(StartupEntry {
            name: name.into(),
            factory: None,
        });
        self
    }

    pub fn with_service_configurator(mut self, name: impl Into<String>, configure: ConfigureServices) -> Self {
        self.configurators.push(ConfiguratorEntry {
            name: name.into(),
            configure_services: Some(configure),
        });
        self
    }

    /// Configurator type that lacks `configure_services`.
    pub fn with_incomplete_service_configurator(mut self, name: impl Into<String>) -> Self {
        self.configurators.push(ConfiguratorEntry {
            name: name.into(),
            configure_services: None,
        });
        self
    }
}

/// The single parameterless startup of `assembly`, instantiated.
pub fn get_dotvvm_startup(assembly: &HostingAssembly) -> Result<Box<dyn DotvvmStartup>, StartupError> {
    let candidates: Vec<(&str, StartupFactory)> = assembly
        .startups
        .iter()
        .filter_map(|s| s.factory.map(|f| (s.name.as_str(), f)))
        .collect();
    match candidates.as_slice() {
        [] => Err(StartupError::MissingStartup {
            assembly: assembly.name.clone(),
        }),
        [(name, factory)] => {
            debug!(assembly = %assembly.name, startup = %name, "found startup");
            Ok(factory())
        }
        many => Err(StartupError::AmbiguousStartup {
            assembly: assembly.name.clone(),
            names: many.iter().map(|(n, _)| n.to_string()).collect(),
        }),
    }
}

/// `configure_services` of the assembly's configurator, if it has one.
pub fn get_configure_services(assembly: &HostingAssembly) -> Result<Option<ConfigureServices>, StartupError> {
    match assembly.configurators.as_slice() {
        [] => Ok(None),
        [configurator] => configurator
            .configure_services
            .map(Some)
            .ok_or_else(|| StartupError::MissingConfigureServices {
                type_name: configurator.name.clone(),
            }),
        many => Err(StartupError::AmbiguousServiceConfigurator {
            assembly: assembly.name.clone(),
            names: many.iter().map(|c| c.name.clone()).collect(),
        }),
    }
}

/// Builds the configuration of `assembly`. Services are configured by the
/// assembly's configurator first, then by `configure_services`; the startup
/// runs last.
pub fn get_configuration(
    assembly: &HostingAssembly,
    web_site_path: &Path,
    configure_services: impl FnOnce(&mut ServiceCollection),
) -> Result<Arc<DotvvmConfiguration>, ConfigurationError> {
    let startup = get_dotvvm_startup(assembly)?;
    let configurator = get_configure_services(assembly)?;

    let mut builder = DotvvmConfigurationBuilder::new(web_site_path);
    if let Some(configure) = configurator {
        configure(builder.services());
    }
    configure_services(builder.services());
    startup.configure(&mut builder, web_site_path);
    builder.build()
}

/// Creates (if needed) the `.dotvvm` directory next to `target`, or inside it
/// when `target` is a directory.
pub fn create_dotvvm_directory(target: &Path) -> Result<PathBuf, StartupError> {
    let base = if target.is_file() {
        target.parent().unwrap_or(Path::new("."))
    } else {
        target
    };
    let dir = base.join(CLI_DIRECTORY_NAME);
    std::fs::create_dir_all(&dir).map_err(|e| StartupError::CliDirectory {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}

/// Path of a tooling file inside the `.dotvvm` directory.
pub fn cli_file(target: &Path, relative_path: &str) -> Result<PathBuf, StartupError> {
    Ok(create_dotvvm_directory(target)?.join(relative_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct CultureFromServices;

    #[derive(Debug)]
    struct Marker(&'static str);

    impl DotvvmStartup for CultureFromServices {
        fn configure(&self, config: &mut DotvvmConfigurationBuilder, _application_path: &Path) {
            let marker = config.services().get::<Marker>().map(|m| m.0).unwrap_or("none");
            config.default_culture(marker);
        }
    }

    fn startup() -> Box<dyn DotvvmStartup> {
        Box::new(CultureFromServices)
    }

    fn configurator(services: &mut ServiceCollection) {
        services.try_add_singleton(Marker("configurator"));
    }

    #[test]
    fn exactly_one_parameterless_startup_is_required() {
        let none = HostingAssembly::new("App").with_startup_requiring_arguments("NeedsArgs");
        assert_eq!(
            get_dotvvm_startup(&none).err(),
            Some(StartupError::MissingStartup { assembly: "App".into() })
        );

        let two = HostingAssembly::new("App")
            .with_startup("A", startup)
            .with_startup("B", startup);
        let err = get_dotvvm_startup(&two).err().unwrap();
        assert_eq!(
            err.to_string(),
            "found more than one DotvvmStartup implementation in 'App': 'A', 'B'"
        );

        let one = HostingAssembly::new("App")
            .with_startup("A", startup)
            .with_startup_requiring_arguments("NeedsArgs");
        assert!(get_dotvvm_startup(&one).is_ok());
    }

    #[test]
    fn configurator_rules() {
        let assembly = HostingAssembly::new("App").with_startup("S", startup);
        assert!(get_configure_services(&assembly).unwrap().is_none());

        let incomplete = assembly.clone().with_incomplete_service_configurator("Services");
        assert_eq!(
            get_configure_services(&incomplete).err(),
            Some(StartupError::MissingConfigureServices { type_name: "Services".into() })
        );

        let two = assembly
            .with_service_configurator("A", configurator)
            .with_service_configurator("B", configurator);
        assert!(matches!(
            get_configure_services(&two),
            Err(StartupError::AmbiguousServiceConfigurator { .. })
        ));
    }

    #[test]
    fn configuration_runs_configurator_then_callback_then_startup() {
        let dir = tempfile::tempdir().unwrap();
        let assembly = HostingAssembly::new("App")
            .with_startup("S", startup)
            .with_service_configurator("Services", configurator);
        let config = get_configuration(&assembly, dir.path(), |services| {
            services.try_add_singleton(Marker("callback"));
        })
        .unwrap();
        assert_eq!(config.default_culture, "configurator");
        assert_eq!(config.application_physical_path, dir.path());

        let plain = HostingAssembly::new("App").with_startup("S", startup);
        let config = get_configuration(&plain, dir.path(), |services| {
            services.try_add_singleton(Marker("callback"));
        })
        .unwrap();
        assert_eq!(config.default_culture, "callback");
    }

    #[test]
    fn registry_scan_only_sees_tagged_entries() {
        let assembly = HostingAssembly::from_registry(
            "App",
            [
                RegistryEntry::Other { name: "Helper".into() },
                RegistryEntry::Startup {
                    name: "S".into(),
                    factory: Some(startup),
                },
            ],
        );
        assert!(get_dotvvm_startup(&assembly).is_ok());
        assert!(get_configure_services(&assembly).unwrap().is_none());
    }

    #[test]
    fn cli_directory_sits_next_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("dotvvm.json");
        std::fs::write(&project, "{}").unwrap();

        let created = create_dotvvm_directory(&project).unwrap();
        assert_eq!(created, dir.path().join(CLI_DIRECTORY_NAME));
        assert!(created.is_dir());
        assert_eq!(
            cli_file(dir.path(), "x.json").unwrap(),
            dir.path().join(CLI_DIRECTORY_NAME).join("x.json")
        );
    }

    proptest! {
        #[test]
        fn resolution_succeeds_iff_one_candidate(qualifying in 0usize..4, skipped in 0usize..3) {
            let mut assembly = HostingAssembly::new("App");
            for i in 0..qualifying {
                assembly = assembly.with_startup(format!("S{i}"), startup);
            }
            for i in 0..skipped {
                assembly = assembly.with_startup_requiring_arguments(format!("N{i}"));
            }
            let result = get_dotvvm_startup(&assembly);
            match qualifying {
                1 => prop_assert!(result.is_ok()),
                0 => {
                    let missing = matches!(result, Err(StartupError::MissingStartup { .. }));
                    prop_assert!(missing);
                }
                n => match result {
                    Err(StartupError::AmbiguousStartup { names, .. }) => prop_assert_eq!(names.len(), n),
                    _ => prop_assert!(false, "expected an ambiguity error"),
                },
            }
        }
    }
}
