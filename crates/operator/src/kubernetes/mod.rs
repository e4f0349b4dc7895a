mod scale;
mod store;

pub use scale::KubeScaleClient;
pub use store::KubeStore;

/// Whether the API server answered 404.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Whether the API server rejected a write against a stale resourceVersion.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "stale".to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_classifies_api_errors_by_code() {
        assert!(is_conflict(&api_error(409)));
        assert!(!is_conflict(&api_error(404)));
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(500)));
    }
}
