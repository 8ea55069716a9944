//! Multipart encoding of publish requests.
//!
//! The byte layout is part of the client contract: parts appear in
//! declared order and a conforming parser must reconstruct them exactly.

use uuid::Uuid;

use crate::error::RegistryError;
use crate::signing::SignatureFormat;

/// An encoded `multipart/form-data` publish body.
pub(crate) struct PublishBody {
    pub(crate) boundary: String,
    pub(crate) bytes: Vec<u8>,
}

/// Encode a publish request body.
///
/// Parts, in order: `source-archive`, then `source-archive-signature`
/// when signed, then `metadata` when given. A signature without a
/// declared format fails before any I/O.
pub(crate) fn build_publish_body(
    archive: &[u8],
    signature: Option<&[u8]>,
    signature_format: Option<SignatureFormat>,
    metadata: Option<&serde_json::Value>,
) -> Result<PublishBody, RegistryError> {
    if signature.is_some() && signature_format.is_none() {
        return Err(RegistryError::MissingSignatureFormat);
    }

    let boundary = Uuid::new_v4().to_string();
    let mut bytes = Vec::new();

    append_part(
        &mut bytes,
        &boundary,
        "source-archive",
        "application/zip",
        "binary",
        archive,
    );
    if let Some(signature) = signature {
        append_part(
            &mut bytes,
            &boundary,
            "source-archive-signature",
            "application/octet-stream",
            "binary",
            signature,
        );
    }
    if let Some(metadata) = metadata {
        let json = serde_json::to_vec(metadata).expect("JSON value serializes");
        append_part(
            &mut bytes,
            &boundary,
            "metadata",
            "application/json",
            "quoted-printable",
            &json,
        );
    }
    bytes.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    Ok(PublishBody { boundary, bytes })
}

fn append_part(
    buffer: &mut Vec<u8>,
    boundary: &str,
    name: &str,
    content_type: &str,
    encoding: &str,
    contents: &[u8],
) {
    buffer.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\nContent-Type: {}\r\nContent-Transfer-Encoding: {}\r\n\r\n",
            boundary, name, content_type, encoding
        )
        .as_bytes(),
    );
    buffer.extend_from_slice(contents);
    buffer.extend_from_slice(b"\r\n");
}
