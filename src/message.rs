use serde::Deserialize;

/// A message to post, as accepted by both ingress paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl MessageRequest {
    pub fn new(title: Option<String>, text: Option<String>, image: Option<String>) -> Self {
        Self { title, text, image }
    }

    /// True when at least one field would render.
    pub fn has_content(&self) -> bool {
        self.fragments().next().is_some()
    }

    /// HTML fragments for the present fields, in title, text, image order.
    /// Empty strings count as absent.
    fn fragments(&self) -> impl Iterator<Item = String> + '_ {
        let present = |field: &Option<String>| -> Option<String> {
            field.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
        };

        let title = present(&self.title).map(|t| format!("<h1>{}</h1>", t));
        let text = present(&self.text).map(|t| format!("<p>{}</p>", t));
        let image = present(&self.image).map(|src| format!("<img src='{}'/>", src));

        [title, text, image].into_iter().flatten()
    }
}

/// Render a request into the HTML body posted to Teams. A request with no
/// content renders to an empty string; callers decide whether that is valid.
pub fn render(request: &MessageRequest) -> String {
    request.fragments().collect()
}
