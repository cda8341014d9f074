//! Azure blob uploads as block lists.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use strata_transport::{Method, Result};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::core::check_status;
use crate::data::Protocol;
use crate::effects::chain::{ContentProvider, IoLink, Next, fill_from_provider};
use crate::effects::context::IoChainContext;

pub const DEFAULT_BLOCK_SIZE: u64 = 100 * 1024 * 1024;

/// Block ids must all have the same length within a blob.
fn block_id(prefix: &str, index: usize) -> String {
    STANDARD.encode(format!("{prefix}+{index:010}"))
}

fn block_list_xml(ids: &[String]) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in ids {
        body.push_str("<Latest>");
        body.push_str(id);
        body.push_str("</Latest>");
    }
    body.push_str("</BlockList>");
    body
}

fn with_query(url: &Url, pairs: &[(&str, &str)]) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);
    out.query_pairs_mut().extend_pairs(pairs);
    out
}

/// Uploads to Azure go through `Put Block` and `Put Block List`, so blobs
/// of any size take the same path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureLink;

impl IoLink for AzureLink {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn write_from_provider(
        &self,
        ctx: &mut IoChainContext<'_>,
        provider: &mut dyn ContentProvider,
        next: Next<'_>,
    ) -> Result<u64> {
        if ctx.protocol != Protocol::Azure {
            return next.write_from_provider(ctx, provider);
        }
        let block_size = ctx.params.upload_chunk_size.unwrap_or(DEFAULT_BLOCK_SIZE).max(1);
        let capacity = block_size.min(provider.size().unwrap_or(block_size).max(1));
        let mut buffer = vec![0u8; capacity as usize];
        let prefix = Uuid::new_v4().simple().to_string();
        let mut ids = Vec::new();
        let mut total = 0u64;
        debug!(target: "strata::io", url = %ctx.url, size = ?provider.size(), block_size, "block upload");

        loop {
            let n = fill_from_provider(provider, &mut buffer)?;
            if n == 0 {
                break;
            }
            let id = block_id(&prefix, ids.len());
            let url = with_query(&ctx.url, &[("comp", "block"), ("blockid", id.as_str())]);
            let mut request = ctx
                .request_to(Method::Put, url)
                .header("x-ms-blob-type", "BlockBlob")
                .body(buffer[..n].to_vec());
            request.execute()?;
            let status = request.status();
            request.finish()?;
            check_status(status, "write block")?;
            ids.push(id);
            total += n as u64;
            if n < buffer.len() {
                break;
            }
        }

        debug!(target: "strata::io", url = %ctx.url, blocks = ids.len(), "committing block list");
        let url = with_query(&ctx.url, &[("comp", "blocklist")]);
        let mut request = ctx
            .request_to(Method::Put, url)
            .header("Content-Type", "application/xml")
            .body(block_list_xml(&ids));
        request.execute()?;
        let status = request.status();
        request.finish()?;
        check_status(status, "commit blocks")?;
        Ok(total)
    }
}
