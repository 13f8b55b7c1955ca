pub mod detector;
pub mod extractor;
pub mod sink;
pub mod transport;

pub use detector::WhatlangDetector;
pub use extractor::HtmlArticleExtractor;
pub use sink::ParquetSink;
pub use transport::ReqwestTransport;
