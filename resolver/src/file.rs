use std::{
    io,
    path::{Path, PathBuf},
};

use vitrine_descriptor::{Fqn, WidgetType};

use super::{Backend, Error};

/// Reads `<dir>/<fqn>.json` widget type documents.
#[derive(Clone, Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, fqn: &Fqn) -> PathBuf {
        self.dir.join(format!("{fqn}.json"))
    }

    async fn read(&self, fqn: &Fqn) -> Result<WidgetType, Error> {
        let path = self.path_for(fqn);
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound { fqn: fqn.clone() });
            }
            Err(err) => return Err(err.into()),
        };
        let widget_type = WidgetType::parse(&source)?;
        if widget_type.fqn != *fqn {
            return Err(Error::FqnMismatch {
                requested: fqn.clone(),
                found: widget_type.fqn,
            });
        }
        Ok(widget_type)
    }
}

impl Backend for FileBackend {
    fn fetch<'a>(
        &'a self,
        fqn: &'a Fqn,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<WidgetType, Error>> + Send + 'a>> {
        Box::pin(self.read(fqn))
    }
}
