//! Prompt template loading and rendering via `minijinja`.
//!
//! Prompt text is authored outside this system; templates are loaded from
//! the filesystem (default: `templates/` directory) so narrative designers
//! can tune agent behavior without recompiling. One template per session
//! kind: planner, moderator, character, offscreen.

use minijinja::Environment;

use crate::error::ModelError;

/// Template names the engine loads at startup.
const TEMPLATE_NAMES: [&str; 4] = ["planner", "moderator", "character", "offscreen"];

/// Manages prompt template loading and rendering.
///
/// Wraps a `minijinja` [`Environment`] with all session templates
/// pre-loaded. Templates can be edited on disk and will be picked up on the
/// next call to [`PromptEngine::new`].
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    /// Create a new prompt engine loading templates from the given
    /// directory.
    ///
    /// The directory must contain: `planner.j2`, `moderator.j2`,
    /// `character.j2`, `offscreen.j2`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Template`] when a template file is missing or
    /// fails to compile.
    pub fn new(templates_dir: &str) -> Result<Self, ModelError> {
        let mut env = Environment::new();

        for name in TEMPLATE_NAMES {
            let source = load_template(templates_dir, &format!("{name}.j2"))?;
            env.add_template_owned(name.to_owned(), source)
                .map_err(|e| ModelError::Template(format!("failed to add {name} template: {e}")))?;
        }

        Ok(Self { env })
    }

    /// Render the named session template with the given context value.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Template`] when the template is unknown or the
    /// render fails.
    pub fn render(&self, name: &str, ctx: &serde_json::Value) -> Result<String, ModelError> {
        self.env
            .get_template(name)
            .map_err(|e| ModelError::Template(format!("missing {name} template: {e}")))?
            .render(ctx)
            .map_err(|e| ModelError::Template(format!("{name} render failed: {e}")))
    }
}

/// Read a template file from disk.
fn load_template(dir: &str, filename: &str) -> Result<String, ModelError> {
    let path = format!("{dir}/{filename}");
    std::fs::read_to_string(&path)
        .map_err(|e| ModelError::Template(format!("failed to read {path}: {e}")))
}
