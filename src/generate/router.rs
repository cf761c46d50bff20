//! Strategy-based dispatch between generator backends.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{CodeGenerator, GeneratedFile, GenerationRequest};
use crate::errors::GenerationError;
use crate::strategy::GenerationStrategy;

/// Routes template requests to one backend and generative requests to another.
///
/// Without a generative backend, generative requests fall back to the template backend.
pub struct StrategyRouter {
    template: Arc<dyn CodeGenerator>,
    generative: Option<Arc<dyn CodeGenerator>>,
}

impl StrategyRouter {
    pub fn new(
        template: Arc<dyn CodeGenerator>,
        generative: Option<Arc<dyn CodeGenerator>>,
    ) -> Self {
        Self {
            template,
            generative,
        }
    }
}

#[async_trait]
impl CodeGenerator for StrategyRouter {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<Vec<GeneratedFile>, GenerationError> {
        match (request.strategy, &self.generative) {
            (GenerationStrategy::Generative, Some(backend)) => backend.generate(request).await,
            (GenerationStrategy::Generative, None) => {
                warn!(
                    story_id = %request.story.id,
                    "No generative backend configured, using template strategy"
                );
                let fallback = GenerationRequest {
                    strategy: GenerationStrategy::Template,
                    ..*request
                };
                self.template.generate(&fallback).await
            }
            (GenerationStrategy::Template, _) => self.template.generate(request).await,
        }
    }

    fn name(&self) -> &str {
        "router"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileManifest;
    use crate::story::UserStory;

    struct Fixed(&'static str);

    #[async_trait]
    impl CodeGenerator for Fixed {
        async fn generate(
            &self,
            request: &GenerationRequest<'_>,
        ) -> Result<Vec<GeneratedFile>, GenerationError> {
            Ok(vec![GeneratedFile::new(
                self.0,
                "x",
                &request.story.id,
                request.strategy,
            )])
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    async fn route(router: &StrategyRouter, strategy: GenerationStrategy) -> GeneratedFile {
        let story = UserStory::new("S1", "x", vec![]);
        let prior = FileManifest::new();
        let request = GenerationRequest {
            story: &story,
            components: &[],
            strategy,
            prior_files: &prior,
            diagnostics: None,
            attempt: 1,
        };
        router.generate(&request).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_dispatch_by_strategy() {
        let router = StrategyRouter::new(Arc::new(Fixed("t.ts")), Some(Arc::new(Fixed("g.ts"))));
        assert_eq!(route(&router, GenerationStrategy::Template).await.path, "t.ts");
        assert_eq!(route(&router, GenerationStrategy::Generative).await.path, "g.ts");
    }

    #[tokio::test]
    async fn test_generative_falls_back_to_template() {
        let router = StrategyRouter::new(Arc::new(Fixed("t.ts")), None);
        let file = route(&router, GenerationStrategy::Generative).await;
        assert_eq!(file.path, "t.ts");
        assert_eq!(file.strategy, GenerationStrategy::Template);
    }
}
