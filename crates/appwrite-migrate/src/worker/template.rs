//! Synthesized worker program text.
//!
//! The worker is a fixed-purpose program (single-file remote copy), not a
//! general code-generation facility: two small text files produced verbatim,
//! with the job parameters arriving at invocation time in the request body
//! rather than being baked into the source.

/// Entrypoint path inside the code archive, also the function's configured
/// entrypoint.
pub const WORKER_ENTRYPOINT_PATH: &str = "src/main.js";

/// Node.js entrypoint source.
///
/// Downloads the file's metadata and binary content from the source project,
/// then re-uploads it to the destination with a multipart form against the
/// raw storage endpoint, preserving the original file ID and permissions.
/// The SDK's InputFile/chunked-upload path is bypassed on purpose: it
/// mishandles binary payloads inside the serverless runtime.
pub fn worker_entrypoint() -> String {
    r#"export default async ({ req, res, log, error }) => {
  try {
    const job = JSON.parse(req.body ?? req.payload ?? '{}');
    const { source, destination, bucketId, fileId } = job;
    if (!source || !destination || !bucketId || !fileId) {
      return res.json({ success: false, error: 'incomplete job payload' });
    }

    const sourceHeaders = {
      'X-Appwrite-Project': source.projectId,
      'X-Appwrite-Key': source.apiKey,
    };

    const metaResponse = await fetch(
      `${source.endpoint}/storage/buckets/${bucketId}/files/${fileId}`,
      { headers: sourceHeaders }
    );
    if (!metaResponse.ok) {
      return res.json({ success: false, error: `metadata fetch failed: ${metaResponse.status}` });
    }
    const meta = await metaResponse.json();

    const downloadResponse = await fetch(
      `${source.endpoint}/storage/buckets/${bucketId}/files/${fileId}/download`,
      { headers: sourceHeaders }
    );
    if (!downloadResponse.ok) {
      return res.json({ success: false, error: `download failed: ${downloadResponse.status}` });
    }
    const content = await downloadResponse.arrayBuffer();

    const form = new FormData();
    form.append('fileId', fileId);
    form.append('file', new Blob([content], { type: meta.mimeType }), meta.name);
    (meta.$permissions ?? []).forEach((permission, i) => {
      form.append(`permissions[${i}]`, permission);
    });

    const uploadResponse = await fetch(
      `${destination.endpoint}/storage/buckets/${bucketId}/files`,
      {
        method: 'POST',
        headers: {
          'X-Appwrite-Project': destination.projectId,
          'X-Appwrite-Key': destination.apiKey,
        },
        body: form,
      }
    );
    if (!uploadResponse.ok && uploadResponse.status !== 409) {
      const body = await uploadResponse.text();
      return res.json({ success: false, error: `upload failed: ${uploadResponse.status} ${body}` });
    }

    log(`transferred ${bucketId}/${fileId} (${content.byteLength} bytes)`);
    return res.json({ success: true });
  } catch (err) {
    error(String(err));
    return res.json({ success: false, error: String(err) });
  }
};
"#
    .to_string()
}

/// package.json manifest declaring the worker's one dependency.
pub fn worker_manifest() -> String {
    r#"{
  "name": "migration-file-transfer-worker",
  "version": "1.0.0",
  "type": "module",
  "main": "src/main.js",
  "dependencies": {
    "node-appwrite": "^11.0.0"
  }
}
"#
    .to_string()
}
