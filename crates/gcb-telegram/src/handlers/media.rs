use teloxide::{net::Download, prelude::*, types::Message};

/// Largest upload accepted for `/config_import`.
pub(crate) const MAX_IMPORT_BYTES: u32 = 64 * 1024;

/// An image attached to a message: the photo itself or an image sent as a file.
pub(crate) struct ImageRef {
    pub file_id: String,
    pub mime_type: String,
}

pub(crate) fn image_of(msg: &Message) -> Option<ImageRef> {
    if let Some(best) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(ImageRef {
            file_id: best.file.id.clone(),
            mime_type: "image/jpeg".to_string(),
        });
    }
    let doc = msg.document()?;
    let mime = doc.mime_type.as_ref()?.to_string();
    if !mime.starts_with("image/") {
        return None;
    }
    Some(ImageRef {
        file_id: doc.file.id.clone(),
        mime_type: mime,
    })
}

/// Download a Telegram file into memory.
pub(crate) async fn download(bot: &Bot, file_id: &str) -> anyhow::Result<Vec<u8>> {
    let file = bot.get_file(file_id.to_string()).await?;
    let mut buf: Vec<u8> = Vec::new();
    bot.download_file(&file.path, &mut buf).await?;
    Ok(buf)
}

pub(crate) fn is_json_file_name(name: &str) -> bool {
    name.to_lowercase().ends_with(".json")
}
