//! S3 XML response builders

use crate::storage::ObjectEntry;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Listings are never paginated; this is only echoed back to clients.
const MAX_KEYS: usize = 1000;

/// Body of a successful PutObject.
pub const PUT_OBJECT_RESULT: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<PutObjectResult/>";

/// ListObjects (v1 and v2) response
#[derive(Debug, Clone)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub contents: Vec<ObjectEntry>,
}

impl ListBucketResult {
    /// Convert to S3 XML format
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!("<ListBucketResult xmlns=\"{}\">\n", S3_XMLNS));

        xml.push_str(&format!("  <Name>{}</Name>\n", escape_xml(&self.name)));
        xml.push_str(&format!(
            "  <Prefix>{}</Prefix>\n",
            escape_xml(&self.prefix)
        ));
        xml.push_str(&format!("  <KeyCount>{}</KeyCount>\n", self.contents.len()));
        xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", MAX_KEYS.max(self.contents.len())));
        xml.push_str("  <IsTruncated>false</IsTruncated>\n");

        for obj in &self.contents {
            xml.push_str("  <Contents>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&obj.key)));
            xml.push_str(&format!("    <Size>{}</Size>\n", obj.size));
            xml.push_str("    <StorageClass>STANDARD</StorageClass>\n");
            xml.push_str("  </Contents>\n");
        }

        xml.push_str("</ListBucketResult>");
        xml
    }
}

/// ListBuckets response
#[derive(Debug, Clone)]
pub struct ListBucketsResult {
    pub owner_id: String,
    pub buckets: Vec<String>,
}

impl ListBucketsResult {
    pub fn to_xml(&self) -> String {
        let owner = escape_xml(&self.owner_id);
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!("<ListAllMyBucketsResult xmlns=\"{}\">\n", S3_XMLNS));
        xml.push_str(&format!(
            "  <Owner>\n    <ID>{}</ID>\n    <DisplayName>{}</DisplayName>\n  </Owner>\n",
            owner, owner
        ));
        xml.push_str("  <Buckets>\n");
        for bucket in &self.buckets {
            xml.push_str(&format!(
                "    <Bucket>\n      <Name>{}</Name>\n    </Bucket>\n",
                escape_xml(bucket)
            ));
        }
        xml.push_str("  </Buckets>\n");
        xml.push_str("</ListAllMyBucketsResult>");
        xml
    }
}

/// CreateBucket response body.
pub fn create_bucket_result(bucket: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CreateBucketResult><Location>/{}</Location></CreateBucketResult>",
        escape_xml(bucket)
    )
}

/// Escape XML special characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
