use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use tracing::info;

use crate::infrastructure::k8s::KubernetesError;

/// Where the client configuration is read from.
///
/// With neither field set the in-cluster service account is tried first,
/// then the default kubeconfig.
#[derive(Debug, Clone, Default)]
pub struct ClientSource {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
}

fn connection_failed(message: impl Into<String>) -> KubernetesError {
    KubernetesError::ConnectionFailed {
        message: message.into(),
    }
}

/// Builds a client and checks that the API server answers.
pub async fn connect(source: &ClientSource) -> Result<Client, Report<KubernetesError>> {
    let options = KubeConfigOptions {
        context: source.context.clone(),
        ..KubeConfigOptions::default()
    };
    let config = match (&source.kubeconfig, &source.context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path).change_context_lazy(|| {
                connection_failed(format!("Failed to read kubeconfig file: {}", path.display()))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .change_context_lazy(|| {
                    connection_failed(format!(
                        "Failed to create config from kubeconfig: {}",
                        path.display()
                    ))
                })?
        }
        (None, Some(context)) => Config::from_kubeconfig(&options)
            .await
            .change_context_lazy(|| {
                connection_failed(format!("Failed to load kubeconfig context {context}"))
            })?,
        (None, None) => Config::infer()
            .await
            .change_context_lazy(|| connection_failed("Failed to infer Kubernetes configuration"))?,
    };

    let client = Client::try_from(config)
        .change_context_lazy(|| connection_failed("Failed to create Kubernetes client"))?;
    let version = client
        .apiserver_version()
        .await
        .change_context_lazy(|| connection_failed("API server did not answer"))?;
    info!(
        "Connected to Kubernetes API server v{}.{}",
        version.major, version.minor
    );
    Ok(client)
}
