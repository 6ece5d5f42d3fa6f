//! Query routing: pick which agent should answer a request.
//!
//! [`ClassifierRouter`] asks a model to name a label. [`SemanticRouter`]
//! compares the query embedding with embedded route descriptions.
//! [`Dispatcher`] forwards the query to the agent registered for the route.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::RouterConfig;
use crate::embedding::{cosine_similarity, Embedder, Embedding};
use crate::error::{ConclaveError, Result};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::message::Message;

#[async_trait]
pub trait Router: Send + Sync {
    /// Name of the route selected for `query`.
    async fn route(&self, query: &str) -> Result<String>;
}

/// Routes by asking a model to answer with one of a fixed set of labels.
pub struct ClassifierRouter {
    model: Arc<dyn LanguageModel>,
    labels: Vec<String>,
}

impl ClassifierRouter {
    /// Blank labels are dropped; they would match any response.
    pub fn new<I, S>(model: Arc<dyn LanguageModel>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model,
            labels: labels
                .into_iter()
                .map(Into::into)
                .filter(|label: &String| !label.trim().is_empty())
                .collect(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn instructions(&self) -> String {
        let options = self
            .labels
            .iter()
            .map(|label| format!("'{label}'"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Return exactly one label from the allowed options list, depending on which \
             label the user's question is most closely related to. Skip all prose.\n\n\
             Options: [{options}]"
        )
    }

    /// Label occurring earliest in `response`; ties go to declaration order.
    fn match_label(&self, response: &str) -> Option<&str> {
        let haystack = response.to_lowercase();
        let mut best: Option<(usize, &str)> = None;
        for label in &self.labels {
            let Some(position) = haystack.find(&label.to_lowercase()) else {
                continue;
            };
            if best.map_or(true, |(current, _)| position < current) {
                best = Some((position, label.as_str()));
            }
        }
        best.map(|(_, label)| label)
    }
}

#[async_trait]
impl Router for ClassifierRouter {
    async fn route(&self, query: &str) -> Result<String> {
        let request =
            CompletionRequest::new(vec![Message::user(query)]).with_preamble(self.instructions());
        let response = self.model.complete(request).await?.joined_text();
        debug!(response = %response, "classifier answered");

        match self.match_label(&response) {
            Some(label) => {
                info!(route = %label, "classified query");
                Ok(label.to_string())
            }
            None => Err(ConclaveError::NoMatchingRoute(format!(
                "no label found in `{}`",
                response.trim()
            ))),
        }
    }
}

/// A named destination, embedded together with its description and examples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub name: String,
    pub description: String,
    pub examples: Vec<String>,
    /// Embedding computed ahead of time; must come from the router's embedder.
    #[serde(default)]
    pub embedding: Option<Embedding>,
}

impl RouteDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn embedding_text(&self) -> String {
        format!(
            "{}: {}. Examples: {}",
            self.name,
            self.description,
            self.examples.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub name: String,
    pub score: f32,
}

/// Nearest-route lookup over embedded [`RouteDefinition`]s.
pub struct SemanticRouter {
    embedder: Arc<dyn Embedder>,
    routes: Vec<(RouteDefinition, Vec<f32>)>,
    min_score: Option<f32>,
}

impl std::fmt::Debug for SemanticRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.routes.iter().map(|(r, _)| r.name.as_str()).collect();
        f.debug_struct("SemanticRouter")
            .field("embedder", &self.embedder.model_id())
            .field("routes", &names)
            .field("min_score", &self.min_score)
            .finish()
    }
}

impl SemanticRouter {
    /// Embed every route that lacks a precomputed embedding.
    pub async fn build(
        embedder: Arc<dyn Embedder>,
        definitions: Vec<RouteDefinition>,
    ) -> Result<Self> {
        let mut routes = Vec::with_capacity(definitions.len());
        let mut dimensions: Option<usize> = None;

        for definition in definitions {
            let vector = match &definition.embedding {
                Some(embedding) if embedding.model != embedder.model_id() => {
                    return Err(ConclaveError::EmbeddingMismatch {
                        expected: embedder.model_id().to_string(),
                        found: embedding.model.clone(),
                    });
                }
                Some(embedding) => embedding.vector.clone(),
                None => embedder.embed(&definition.embedding_text()).await?,
            };

            match dimensions {
                Some(expected) if expected != vector.len() => {
                    return Err(ConclaveError::EmbeddingMismatch {
                        expected: format!("{expected} dimensions"),
                        found: format!("{} dimensions in route `{}`", vector.len(), definition.name),
                    });
                }
                _ => dimensions = Some(vector.len()),
            }
            routes.push((definition, vector));
        }

        debug!(routes = routes.len(), embedder = %embedder.model_id(), "semantic router ready");
        Ok(Self {
            embedder,
            routes,
            min_score: None,
        })
    }

    /// Treat matches scoring below `min_score` as no match.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_config(mut self, config: &RouterConfig) -> Self {
        self.min_score = config.min_score;
        self
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteDefinition> + '_ {
        self.routes.iter().map(|(definition, _)| definition)
    }

    /// Highest-scoring route for an already embedded query. Exact ties keep
    /// the route declared first.
    pub fn best_match(&self, query: &[f32]) -> Option<RouteMatch> {
        let mut best: Option<RouteMatch> = None;
        for (definition, vector) in &self.routes {
            let score = cosine_similarity(vector, query);
            if best.as_ref().map_or(true, |current| score > current.score) {
                best = Some(RouteMatch {
                    name: definition.name.clone(),
                    score,
                });
            }
        }
        best
    }

    pub async fn route_scored(&self, query: &str) -> Result<RouteMatch> {
        let embedded = self.embedder.embed(query).await?;
        if let Some((_, first)) = self.routes.first() {
            if first.len() != embedded.len() {
                return Err(ConclaveError::EmbeddingMismatch {
                    expected: format!("{} dimensions", first.len()),
                    found: format!("{} dimensions in query", embedded.len()),
                });
            }
        }

        let best = self
            .best_match(&embedded)
            .ok_or_else(|| ConclaveError::NoMatchingRoute("router has no routes".into()))?;

        if let Some(floor) = self.min_score {
            if best.score < floor {
                warn!(route = %best.name, score = best.score, floor, "best route below threshold");
                return Err(ConclaveError::NoMatchingRoute(format!(
                    "best route `{}` scored {:.3}, below {floor}",
                    best.name, best.score
                )));
            }
        }

        info!(route = %best.name, score = best.score, "routed query");
        Ok(best)
    }
}

#[async_trait]
impl Router for SemanticRouter {
    async fn route(&self, query: &str) -> Result<String> {
        Ok(self.route_scored(query).await?.name)
    }
}

/// Sends each query to the agent registered under the selected route.
pub struct Dispatcher {
    router: Arc<dyn Router>,
    agents: HashMap<String, Arc<Mutex<Agent>>>,
    default_route: Option<String>,
}

impl Dispatcher {
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self {
            router,
            agents: HashMap::new(),
            default_route: None,
        }
    }

    pub fn with_route(self, route: impl Into<String>, agent: Agent) -> Self {
        self.with_shared_route(route, Arc::new(Mutex::new(agent)))
    }

    pub fn with_shared_route(mut self, route: impl Into<String>, agent: Arc<Mutex<Agent>>) -> Self {
        self.agents.insert(route.into(), agent);
        self
    }

    /// Route used when nothing matches or the router names an unregistered route.
    pub fn with_default_route(mut self, route: impl Into<String>) -> Self {
        self.default_route = Some(route.into());
        self
    }

    pub fn agent(&self, route: &str) -> Option<Arc<Mutex<Agent>>> {
        self.agents.get(route).cloned()
    }

    /// Route `query` and prompt the chosen agent. Returns the route and the reply.
    pub async fn dispatch(&self, query: &str) -> Result<(String, String)> {
        let route = match self.router.route(query).await {
            Ok(route) if self.agents.contains_key(&route) => route,
            Ok(route) => self.fallback(ConclaveError::NoMatchingRoute(format!(
                "no agent registered for route `{route}`"
            )))?,
            Err(err @ ConclaveError::NoMatchingRoute(_)) => self.fallback(err)?,
            Err(err) => return Err(err),
        };

        let agent = self
            .agents
            .get(&route)
            .ok_or_else(|| ConclaveError::NoMatchingRoute(route.clone()))?;
        let reply = agent.lock().await.prompt(query).await?;
        Ok((route, reply))
    }

    fn fallback(&self, err: ConclaveError) -> Result<String> {
        match &self.default_route {
            Some(route) if self.agents.contains_key(route) => {
                debug!(route = %route, reason = %err, "using default route");
                Ok(route.clone())
            }
            _ => Err(err),
        }
    }
}
