//! Maps [`ControlPlaneError`] onto `tonic::Status` codes.

use modelplane_types::ControlPlaneError;
use tonic::{Code, Status};

pub fn to_status(err: ControlPlaneError) -> Status {
    let (code, message) = match &err {
        ControlPlaneError::InvalidArgument(_) => (Code::InvalidArgument, err.to_string()),
        ControlPlaneError::NotFound(_) => (Code::NotFound, err.to_string()),
        ControlPlaneError::FailedPrecondition(_) => (Code::FailedPrecondition, err.to_string()),
        ControlPlaneError::ResourceExhausted(_) => (Code::ResourceExhausted, err.to_string()),
        ControlPlaneError::Unavailable(_) => (Code::Unavailable, err.to_string()),
        ControlPlaneError::Internal(_) | ControlPlaneError::Fatal(_) => (Code::Internal, err.to_string()),
    };
    Status::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_not_found_code() {
        let status = to_status(ControlPlaneError::NotFound("model m1".to_string()));
        assert_eq!(status.code(), Code::NotFound);
    }

    #[test]
    fn internal_and_fatal_both_map_to_internal_code() {
        assert_eq!(to_status(ControlPlaneError::Internal("x".into())).code(), Code::Internal);
        assert_eq!(to_status(ControlPlaneError::Fatal("x".into())).code(), Code::Internal);
    }
}
