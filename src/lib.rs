pub mod config;
pub mod error;
pub mod media;
pub mod routes;

use crate::media::remote::AdminClient;
use crate::media::service::MediaService;

#[derive(Clone)]
pub struct AppState {
    pub media: MediaService<AdminClient>,
}
