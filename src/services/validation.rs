use garde::Validate;

use crate::models::upload::{CreateUploadJobRequest, FailPhotoUploadRequest, FieldError};

/// Field-level validation of client requests.
pub trait UploadValidator: Send + Sync {
    fn validate_job(&self, request: &CreateUploadJobRequest) -> Vec<FieldError>;

    fn validate_failure(&self, request: &FailPhotoUploadRequest) -> Vec<FieldError>;
}

/// Validator backed by the `garde` rules declared on the request types.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValidator;

impl UploadValidator for DefaultValidator {
    fn validate_job(&self, request: &CreateUploadJobRequest) -> Vec<FieldError> {
        field_errors(request.validate())
    }

    fn validate_failure(&self, request: &FailPhotoUploadRequest) -> Vec<FieldError> {
        field_errors(request.validate())
    }
}

fn field_errors(result: Result<(), garde::Report>) -> Vec<FieldError> {
    match result {
        Ok(()) => Vec::new(),
        Err(report) => report
            .iter()
            .map(|(path, error)| FieldError::new(path.to_string(), error.message()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upload::PhotoUploadItem;

    #[test]
    fn test_errors_carry_field_paths() {
        let request = CreateUploadJobRequest {
            photos: vec![
                PhotoUploadItem {
                    filename: "ok.jpg".to_string(),
                    file_size: 4096,
                    content_type: "image/jpeg".to_string(),
                },
                PhotoUploadItem {
                    filename: "bad.pdf".to_string(),
                    file_size: 4096,
                    content_type: "application/pdf".to_string(),
                },
            ],
        };

        let errors = DefaultValidator.validate_job(&request);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].field.contains("photos[1]"));
        assert!(errors[0].field.contains("content_type"));
    }

    #[test]
    fn test_valid_failure_report() {
        let request = FailPhotoUploadRequest {
            error_message: "network reset".to_string(),
        };
        assert!(DefaultValidator.validate_failure(&request).is_empty());
    }
}
