//! Wraps a base [`Translator`] under a different engine name without
//! spawning a different command — mirrors `runner.py`'s `AliasRunner`,
//! which lets an operator register e.g. `codex-yolo` as a distinct resume
//! namespace over the same `codex` binary with different `extra_args`.

use relay_core::{EngineId, Event, ResumeToken};
use serde_json::Value;

use crate::translator::{JsonlRunState, Translator};

pub struct AliasTranslator<T: Translator> {
    alias: EngineId,
    base: T,
}

impl<T: Translator> AliasTranslator<T> {
    pub fn new(alias: impl Into<EngineId>, base: T) -> Self {
        Self { alias: alias.into(), base }
    }

    fn rewrite(&self, evt: Event) -> Event {
        if evt.engine() != self.base.engine() {
            return evt;
        }
        match evt {
            Event::Started { resume, title, meta, .. } => Event::Started {
                engine: self.alias.clone(),
                resume: ResumeToken::new(self.alias.clone(), resume.value),
                title,
                meta,
            },
            Event::Action { action, phase, ok, message, level, .. } => Event::Action {
                engine: self.alias.clone(),
                action,
                phase,
                ok,
                message,
                level,
            },
            Event::Completed { ok, answer, resume, error, usage, .. } => Event::Completed {
                engine: self.alias.clone(),
                ok,
                answer,
                resume: resume.map(|r| {
                    if r.engine == *self.base.engine() {
                        ResumeToken::new(self.alias.clone(), r.value)
                    } else {
                        r
                    }
                }),
                error,
                usage,
            },
        }
    }

    fn rewrite_resume(&self, resume: Option<&ResumeToken>) -> Option<ResumeToken> {
        resume.map(|r| ResumeToken::new(self.base.engine().clone(), r.value.clone()))
    }
}

impl<T: Translator> Translator for AliasTranslator<T> {
    fn engine(&self) -> &EngineId {
        &self.alias
    }

    fn command(&self) -> &str {
        self.base.command()
    }

    fn tag(&self) -> &str {
        self.alias.as_str()
    }

    fn build_args(&self, prompt: &str, resume: Option<&ResumeToken>) -> Vec<String> {
        let base_resume = self.rewrite_resume(resume);
        self.base.build_args(prompt, base_resume.as_ref())
    }

    fn stdin_payload(&self, prompt: &str, resume: Option<&ResumeToken>) -> Option<Vec<u8>> {
        let base_resume = self.rewrite_resume(resume);
        self.base.stdin_payload(prompt, base_resume.as_ref())
    }

    fn env(&self) -> Option<Vec<(String, String)>> {
        self.base.env()
    }

    fn new_state(&self, resume: Option<&ResumeToken>) -> JsonlRunState {
        let base_resume = self.rewrite_resume(resume);
        self.base.new_state(base_resume.as_ref())
    }

    fn translate(
        &self,
        data: &Value,
        state: &mut JsonlRunState,
        resume: Option<&ResumeToken>,
        found_session: Option<&ResumeToken>,
    ) -> Vec<Event> {
        let base_resume = self.rewrite_resume(resume);
        let base_found = self.rewrite_resume(found_session);
        self.base
            .translate(data, state, base_resume.as_ref(), base_found.as_ref())
            .into_iter()
            .map(|evt| self.rewrite(evt))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::codex::CodexTranslator;

    #[test]
    fn alias_rewrites_engine_and_resume() {
        let base = CodexTranslator::new("codex", vec![], "Codex");
        let alias = AliasTranslator::new("codex-yolo", base);
        let args = alias.build_args("hello", None);
        assert!(args.contains(&"exec".to_string()));

        let started = Event::Started {
            engine: EngineId::new("codex"),
            resume: ResumeToken::new("codex", "abc"),
            title: "Codex".into(),
            meta: None,
        };
        let rewritten = alias.rewrite(started);
        assert_eq!(rewritten.engine(), &EngineId::new("codex-yolo"));
    }
}
