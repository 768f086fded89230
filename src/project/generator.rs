//! Generator plans: which external scaffolding tool runs for each framework
//!
//! Each framework has an ordered list of attempts. The first is the globally
//! installed CLI; the second fetches and runs it through `npx`. Both use the
//! same fixed non-interactive flags.

use std::path::{Path, PathBuf};

use crate::config::{CommandSpec, GeneratorSection};
use crate::project::runner::RunError;
use crate::project::state::Framework;

const ANGULAR_FLAGS: &[&str] = &[
    "--directory=.",
    "--routing=true",
    "--style=scss",
    "--skip-git",
    "--skip-tests",
    "--defaults",
    "--skip-install",
];

const REACT_FLAGS: &[&str] = &[".", "--template", "typescript"];

/// One way of invoking a generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorAttempt {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
}

impl GeneratorAttempt {
    fn from_spec(label: String, spec: &CommandSpec, name: &str) -> Self {
        Self {
            label,
            program: spec.program.clone(),
            args: spec.args.iter().map(|a| a.replace("{name}", name)).collect(),
        }
    }
}

/// Platform name of a node tool (`npm.cmd` on Windows)
pub fn node_tool(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.cmd", name)
    } else {
        name.to_string()
    }
}

fn builtin_plan(framework: Framework, name: &str) -> Vec<GeneratorAttempt> {
    let owned = |flags: &[&str]| flags.iter().map(|f| f.to_string()).collect::<Vec<_>>();
    match framework {
        Framework::Angular => {
            let mut global = vec!["new".to_string(), name.to_string()];
            global.extend(owned(ANGULAR_FLAGS));
            let mut fetched = vec![
                "--yes".to_string(),
                "@angular/cli@latest".to_string(),
                "new".to_string(),
                name.to_string(),
            ];
            fetched.extend(owned(ANGULAR_FLAGS));
            vec![
                GeneratorAttempt {
                    label: "global".to_string(),
                    program: node_tool("ng"),
                    args: global,
                },
                GeneratorAttempt {
                    label: "npx".to_string(),
                    program: node_tool("npx"),
                    args: fetched,
                },
            ]
        }
        Framework::React => {
            let mut fetched = vec!["--yes".to_string(), "create-react-app".to_string()];
            fetched.extend(owned(REACT_FLAGS));
            vec![
                GeneratorAttempt {
                    label: "global".to_string(),
                    program: node_tool("create-react-app"),
                    args: owned(REACT_FLAGS),
                },
                GeneratorAttempt {
                    label: "npx".to_string(),
                    program: node_tool("npx"),
                    args: fetched,
                },
            ]
        }
    }
}

/// Ordered generator attempts for `framework`; a configured plan replaces the
/// builtin one entirely.
pub fn generator_plan(
    framework: Framework,
    name: &str,
    config: &GeneratorSection,
) -> Vec<GeneratorAttempt> {
    match config.plans.get(framework.as_str()) {
        Some(steps) if !steps.is_empty() => steps
            .iter()
            .enumerate()
            .map(|(i, spec)| GeneratorAttempt::from_spec(format!("attempt {}", i + 1), spec, name))
            .collect(),
        _ => builtin_plan(framework, name),
    }
}

/// Dependency install step run after a successful generator, if enabled
pub fn install_step(config: &GeneratorSection) -> Option<CommandSpec> {
    if !config.install_dependencies {
        return None;
    }
    Some(
        config
            .install
            .clone()
            .unwrap_or_else(|| CommandSpec::new(node_tool("npm"), &["install"])),
    )
}

/// Locate `program` on PATH. Explicit paths are used as given.
pub fn resolve_program(program: &str, search_path: Option<&str>) -> Result<PathBuf, RunError> {
    if Path::new(program).components().count() > 1 {
        return Ok(PathBuf::from(program));
    }
    let found = match search_path {
        Some(paths) => {
            let cwd = std::env::current_dir().map_err(|e| RunError::Launch {
                program: program.to_string(),
                reason: e.to_string(),
            })?;
            which::which_in(program, Some(paths), cwd)
        }
        None => which::which(program),
    };
    found.map_err(|e| RunError::Launch {
        program: program.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_angular_plan() {
        let plan = generator_plan(Framework::Angular, "shop", &GeneratorSection::default());
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].label, "global");
        assert_eq!(plan[0].args[..2], ["new".to_string(), "shop".to_string()]);
        assert!(plan[0].args.contains(&"--skip-git".to_string()));
        assert!(plan[0].args.contains(&"--skip-tests".to_string()));
        assert_eq!(plan[1].label, "npx");
        assert!(plan[1].args.contains(&"@angular/cli@latest".to_string()));
    }

    #[test]
    fn test_builtin_react_plan_generates_in_place() {
        let plan = generator_plan(Framework::React, "demo", &GeneratorSection::default());
        assert_eq!(plan[0].args, vec![".", "--template", "typescript"]);
        assert_eq!(plan[1].args[..2], ["--yes".to_string(), "create-react-app".to_string()]);
    }

    #[test]
    fn test_configured_plan_substitutes_name() {
        let mut config = GeneratorSection::default();
        config.plans.insert(
            "react".to_string(),
            vec![CommandSpec::new("sh", &["-c", "mkdir {name}"])],
        );
        let plan = generator_plan(Framework::React, "demo", &config);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].args, vec!["-c", "mkdir demo"]);
        // 其他框架仍使用内置计划
        assert_eq!(generator_plan(Framework::Angular, "demo", &config).len(), 2);
    }

    #[test]
    fn test_install_step() {
        let mut config = GeneratorSection::default();
        assert_eq!(install_step(&config).unwrap().args, vec!["install"]);
        config.install_dependencies = false;
        assert!(install_step(&config).is_none());
    }

    #[test]
    fn test_resolve_missing_program() {
        let err = resolve_program("devbench-definitely-missing", None).unwrap_err();
        assert!(err.is_launch());
    }
}
