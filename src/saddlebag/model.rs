use serde::Deserialize;

/// One dataset record from the upload-timers endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTimer {
    #[serde(rename = "dataSetID")]
    pub data_set_id: i64,
    #[serde(default)]
    pub region: String,
    #[serde(rename = "lastUploadMinute")]
    pub last_upload_minute: u32,
    #[serde(rename = "lastUploadTimeRaw", default)]
    pub last_upload_time_raw: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadTimersResponse {
    pub data: Vec<UploadTimer>,
}
