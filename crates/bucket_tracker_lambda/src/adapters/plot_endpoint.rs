#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: String,
}

impl EndpointResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait PlotEndpoint {
    /// Transport failures are `Err`; any HTTP status is `Ok`.
    fn request_plot(&self) -> Result<EndpointResponse, String>;
}
