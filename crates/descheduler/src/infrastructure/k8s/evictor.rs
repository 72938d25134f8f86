use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, PostParams};
use kube::core::Request;
use kube::{Api, Client};
use tracing::{debug, info};

use crate::domain::error::EvictionError;
use crate::domain::traits::PodEvictor;
use crate::domain::types::PodUnit;
use crate::infrastructure::k8s::KubernetesError;

const POLICY_GROUP: &str = "policy";
/// Served eviction versions, most preferred first.
const EVICTION_VERSIONS: [&str; 2] = ["v1", "v1beta1"];

/// Most preferred eviction version among `served`.
pub fn pick_eviction_version<'a>(served: impl IntoIterator<Item = &'a str>) -> Option<&'static str> {
    let served: Vec<&str> = served.into_iter().collect();
    EVICTION_VERSIONS
        .into_iter()
        .find(|version| served.contains(version))
}

/// `policy/<version>` if the API server serves evictions at all.
pub async fn discover_eviction_api_version(
    client: &Client,
) -> Result<Option<String>, Report<KubernetesError>> {
    let group = match kube::discovery::group(client, POLICY_GROUP).await {
        Ok(group) => group,
        Err(kube::Error::Api(response)) if response.code == 404 => return Ok(None),
        Err(e) => {
            return Err(Report::new(KubernetesError::DiscoveryFailed {
                group: POLICY_GROUP.to_string(),
                message: e.to_string(),
            }))
        }
    };
    let version = pick_eviction_version(group.versions());
    Ok(version.map(|v| format!("{POLICY_GROUP}/{v}")))
}

/// Maps an API failure onto the eviction outcomes the controller handles.
pub fn classify_error(error: kube::Error) -> EvictionError {
    match error {
        kube::Error::Api(response) if response.code == 429 => EvictionError::TooManyRequests,
        kube::Error::Api(response) if response.code == 404 => EvictionError::NotFound,
        other => EvictionError::Other {
            message: other.to_string(),
        },
    }
}

fn eviction_body(api_version: &str, pod: &PodUnit) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": api_version,
        "kind": "Eviction",
        "metadata": {
            "name": pod.name,
            "namespace": pod.namespace,
        },
    })
}

/// Evicts through the eviction subresource, or deletes the pod when the
/// cluster serves no eviction API.
pub struct KubePodEvictor {
    client: Client,
    api_version: Option<String>,
}

impl KubePodEvictor {
    pub fn new(client: Client, api_version: Option<String>) -> Self {
        match &api_version {
            Some(version) => info!("Evicting pods through {version}"),
            None => info!("No eviction API served, pods will be deleted"),
        }
        Self {
            client,
            api_version,
        }
    }

    async fn post_eviction(&self, api_version: &str, pod: &PodUnit) -> Result<(), kube::Error> {
        let body = serde_json::to_vec(&eviction_body(api_version, pod))
            .map_err(kube::Error::SerdeError)?;
        let request = Request::new(format!("/api/v1/namespaces/{}/pods", pod.namespace))
            .create_subresource("eviction", &pod.name, &PostParams::default(), body)
            .map_err(kube::Error::BuildRequest)?;
        self.client
            .request::<serde_json::Value>(request)
            .await
            .map(|_| ())
    }

    async fn delete(&self, pod: &PodUnit) -> Result<(), kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        api.delete(&pod.name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl PodEvictor for KubePodEvictor {
    async fn evict_pod(&self, pod: &PodUnit) -> Result<(), EvictionError> {
        debug!(pod = %pod.key(), "Requesting eviction");
        let result = match &self.api_version {
            Some(version) => self.post_eviction(version, pod).await,
            None => self.delete(pod).await,
        };
        result.map_err(classify_error)
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::mock::pod;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "rejected".to_string(),
            reason: "TooManyRequests".to_string(),
            code,
        })
    }

    #[test]
    fn prefers_stable_eviction_api() {
        assert_eq!(pick_eviction_version(["v1beta1", "v1"]), Some("v1"));
        assert_eq!(pick_eviction_version(["v1beta1"]), Some("v1beta1"));
        assert_eq!(pick_eviction_version(["v2alpha1"]), None);
    }

    #[test]
    fn api_errors_map_to_outcomes() {
        assert_eq!(classify_error(api_error(429)), EvictionError::TooManyRequests);
        assert_eq!(classify_error(api_error(404)), EvictionError::NotFound);
        assert!(matches!(
            classify_error(api_error(500)),
            EvictionError::Other { .. }
        ));
    }

    #[test]
    fn eviction_body_names_the_pod() {
        let body = eviction_body("policy/v1", &pod("web-0", "shop", "n1", 0, 0));
        assert_eq!(body["apiVersion"], "policy/v1");
        assert_eq!(body["kind"], "Eviction");
        assert_eq!(body["metadata"]["name"], "web-0");
        assert_eq!(body["metadata"]["namespace"], "shop");
    }
}
