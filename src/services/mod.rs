pub mod assembler;
pub mod chapter_source;
pub mod content_fetcher;
pub mod discovery;
pub mod packager;
pub mod partitioner;
pub mod progress_store;
pub mod sanitizer;

pub use assembler::{Artifact, ArtifactAssembler, AssemblyOptions};
pub use chapter_source::{BrowserChapterSource, ChapterSource, PageOutcome};
pub use content_fetcher::{ContentFetcher, FetchPolicy};
pub use discovery::{ApiCatalog, ChapterCatalog, DomCatalog, UnitDiscovery};
pub use packager::{BookDocument, EpubPackager, PackageError, Packager};
pub use partitioner::Selection;
pub use progress_store::ProgressStore;
