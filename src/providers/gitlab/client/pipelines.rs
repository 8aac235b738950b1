use super::core::GitLabClient;
use crate::error::Result;
use crate::providers::gitlab::types::{Pipeline, PipelineInfo};

impl GitLabClient {
    /// First page of a project's pipelines, newest first by id.
    ///
    /// Only the latest pipeline matters to the exporter, so later pages are
    /// never requested.
    pub async fn list_pipelines(&self, project_id: u64) -> Result<Vec<PipelineInfo>> {
        let query = [("order_by", "id".to_string()), ("sort", "desc".to_string())];
        let page = self
            .get_page(&format!("projects/{project_id}/pipelines"), &query, 1)
            .await?;
        Ok(page.items)
    }

    /// Full pipeline detail, including duration and creation time.
    pub async fn get_pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<Pipeline> {
        self.get_json(&format!("projects/{project_id}/pipelines/{pipeline_id}"), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::gitlab::client::ClientOptions;
    use crate::providers::gitlab::types::PipelineStatus;
    use mockito::Matcher;

    #[tokio::test]
    async fn lists_pipelines_newest_first() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/5/pipelines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("order_by".into(), "id".into()),
                Matcher::UrlEncoded("sort".into(), "desc".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"id": 11, "ref": "main", "status": "failed", "created_at": "2024-01-02T00:00:00Z"},
                    {"id": 10, "ref": "dev", "status": "success", "created_at": "2024-01-01T00:00:00Z"}
                ]"#,
            )
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), None, &ClientOptions::default()).unwrap();
        let pipelines = client.list_pipelines(5).await.unwrap();

        assert_eq!(pipelines.len(), 2);
        assert_eq!(pipelines[0].id, 11);
        assert_eq!(pipelines[0].status, PipelineStatus::Failed);
        assert_eq!(pipelines[1].ref_, "dev");
        mock.assert_async().await;
    }
}
