/// Language Runners
///
/// A runner owns the argv recipe for one language: an optional compile step
/// and the run command. Interpreted languages only run; compiled languages
/// compile first and never run when compilation fails.
use crate::config::LanguageConfig;
use arbiter_common::types::Language;

/// Private per-execution paths inside a sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    pub workdir: String,
    pub source_path: String,
    pub binary_path: String,
}

impl Workspace {
    pub fn new(workdir: impl Into<String>, source_file: &str) -> Self {
        let workdir = workdir.into();
        Self {
            source_path: format!("{}/{}", workdir, source_file),
            binary_path: format!("{}/main", workdir),
            workdir,
        }
    }
}

pub trait LanguageRunner: Send + Sync {
    fn language(&self) -> Language;

    /// File name the source is staged under
    fn source_file(&self) -> &str;

    fn compile_command(&self, workspace: &Workspace) -> Option<Vec<String>>;

    fn run_command(&self, workspace: &Workspace) -> Vec<String>;

    /// A non-zero compiler exit, or an error diagnostic, is a failed compile
    fn compilation_failed(&self, exit_code: Option<i64>, diagnostics: &str) -> bool {
        exit_code != Some(0) || diagnostics.contains("error:")
    }
}

/// Substitute workspace placeholders in each argument independently
fn render(template: &[String], workspace: &Workspace) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{source}", &workspace.source_path)
                .replace("{binary}", &workspace.binary_path)
                .replace("{workdir}", &workspace.workdir)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Interpreted {
    language: Language,
    source_file: String,
    run: Vec<String>,
}

impl LanguageRunner for Interpreted {
    fn language(&self) -> Language {
        self.language
    }

    fn source_file(&self) -> &str {
        &self.source_file
    }

    fn compile_command(&self, _workspace: &Workspace) -> Option<Vec<String>> {
        None
    }

    fn run_command(&self, workspace: &Workspace) -> Vec<String> {
        render(&self.run, workspace)
    }
}

#[derive(Debug, Clone)]
pub struct Compiled {
    language: Language,
    source_file: String,
    compile: Vec<String>,
    run: Vec<String>,
}

impl LanguageRunner for Compiled {
    fn language(&self) -> Language {
        self.language
    }

    fn source_file(&self) -> &str {
        &self.source_file
    }

    fn compile_command(&self, workspace: &Workspace) -> Option<Vec<String>> {
        Some(render(&self.compile, workspace))
    }

    fn run_command(&self, workspace: &Workspace) -> Vec<String> {
        render(&self.run, workspace)
    }
}

/// Pick the runner variant a language's recipe calls for
pub fn runner_for(language: Language, config: &LanguageConfig) -> Box<dyn LanguageRunner> {
    let source_file = config.execution.source_file.clone();
    let run = config.execution.run.clone();
    match &config.execution.compile {
        Some(compile) => Box::new(Compiled {
            language,
            source_file,
            compile: compile.clone(),
            run,
        }),
        None => Box::new(Interpreted {
            language,
            source_file,
            run,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        Workspace::new("/sandbox/abc", "main.cpp")
    }

    #[test]
    fn test_workspace_paths() {
        let ws = workspace();
        assert_eq!(ws.source_path, "/sandbox/abc/main.cpp");
        assert_eq!(ws.binary_path, "/sandbox/abc/main");
    }

    #[test]
    fn test_python_is_interpreted() {
        let runner = runner_for(Language::Python, &LanguageConfig::builtin(Language::Python));
        let ws = Workspace::new("/sandbox/abc", runner.source_file());
        assert!(runner.compile_command(&ws).is_none());
        assert_eq!(
            runner.run_command(&ws),
            vec!["python3", "-u", "/sandbox/abc/main.py"]
        );
    }

    #[test]
    fn test_cpp_compiles_then_runs_binary() {
        let runner = runner_for(Language::Cpp, &LanguageConfig::builtin(Language::Cpp));
        let ws = workspace();
        let compile = runner.compile_command(&ws).unwrap();
        assert_eq!(compile[0], "g++");
        assert!(compile.contains(&"-std=c++17".to_string()));
        assert!(compile.contains(&"/sandbox/abc/main.cpp".to_string()));
        assert_eq!(runner.run_command(&ws), vec!["/sandbox/abc/main"]);
    }

    #[test]
    fn test_placeholders_are_not_shell_interpreted() {
        let ws = Workspace::new("/sandbox/x", "a b;rm -rf.py");
        let rendered = render(&["{source}".to_string()], &ws);
        assert_eq!(rendered, vec!["/sandbox/x/a b;rm -rf.py"]);
    }

    #[test]
    fn test_compilation_failure_detection() {
        let runner = runner_for(Language::Cpp, &LanguageConfig::builtin(Language::Cpp));
        assert!(!runner.compilation_failed(Some(0), ""));
        assert!(!runner.compilation_failed(Some(0), "main.cpp:3: warning: unused variable"));
        assert!(runner.compilation_failed(Some(1), ""));
        assert!(runner.compilation_failed(Some(0), "main.cpp:1:1: error: expected ';'"));
        assert!(runner.compilation_failed(None, ""));
    }
}
