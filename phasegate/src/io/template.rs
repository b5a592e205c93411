//! minijinja rendering for phase prompts and gate text.

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

/// Template engine wrapper. Undefined variables are errors.
#[derive(Debug)]
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Render an inline template against `ctx`.
    pub fn render<S: Serialize>(&self, source: &str, ctx: S) -> Result<String> {
        self.env.render_str(source, ctx).context("render template")
    }

    /// Check that `source` parses without rendering it.
    pub fn check(&self, source: &str) -> Result<()> {
        self.env
            .template_from_str(source)
            .map(|_| ())
            .context("parse template")
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}
