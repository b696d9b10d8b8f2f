use crate::batch::*;
use crate::catalog::*;
use crate::config::*;
use crate::error::CatalogError;
use crate::reduce::*;
use crate::selection::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

/// Writes an hourly reanalysis-like grid:
/// time(48, hours since 2020-01-01) x latitude(5, 30..10) x longitude(3),
/// with `t2m` constant at `t2m_value` and `cape` growing with time.
fn write_era5(dir: &Path, filename: &str, t2m_value: f32) -> PathBuf {
    let path = dir.join(filename);
    let mut file = netcdf::create(&path).unwrap();
    file.add_dimension("time", 48).unwrap();
    file.add_dimension("latitude", 5).unwrap();
    file.add_dimension("longitude", 3).unwrap();
    file.add_attribute("Conventions", "CF-1.6").unwrap();

    {
        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "hours since 2020-01-01 00:00:00").unwrap();
        let hours: Vec<f64> = (0..48).map(|h| h as f64).collect();
        time.put_values(&hours, ..).unwrap();
    }
    {
        let mut lat = file.add_variable::<f32>("latitude", &["latitude"]).unwrap();
        lat.put_attribute("units", "degrees_north").unwrap();
        lat.put_values(&[30.0f32, 25.0, 20.0, 15.0, 10.0], ..).unwrap();
    }
    {
        let mut lon = file.add_variable::<f32>("longitude", &["longitude"]).unwrap();
        lon.put_attribute("units", "degrees_east").unwrap();
        lon.put_values(&[118.0f32, 119.0, 120.0], ..).unwrap();
    }
    {
        let mut t2m = file
            .add_variable::<f32>("t2m", &["time", "latitude", "longitude"])
            .unwrap();
        t2m.put_attribute("units", "K").unwrap();
        t2m.put_values(&vec![t2m_value; 48 * 5 * 3], ..).unwrap();
    }
    {
        let mut cape = file
            .add_variable::<f32>("cape", &["time", "latitude", "longitude"])
            .unwrap();
        cape.put_attribute("units", "J kg**-1").unwrap();
        // 100 J/kg per hour everywhere: hours 21..=47 exceed 2000.
        let values: Vec<f32> = (0..48 * 5 * 3).map(|i| (i / 15) as f32 * 100.0).collect();
        cape.put_values(&values, ..).unwrap();
    }
    path
}

fn write_stations_csv(dir: &Path) -> PathBuf {
    let path = dir.join("stations.csv");
    fs::write(&path, "x,y\n1,4\n2,5\n3,6\n").unwrap();
    path
}

fn write_catalog(dir: &Path, filename: &str, content: &str) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, content).unwrap();
    path
}

const ERA5_CATALOG: &str = r#"
description: ERA5 subset
metadata:
  version: 1
sources:
  era5_2020:
    description: ERA5 hourly single levels, January 2020
    driver: netcdf
    args:
      urlpath: era5_2020.nc
    metadata:
      tags: [reanalysis, temperature]
      data_types: [gridded]
  era5_year:
    description: ERA5 hourly single levels for a chosen year
    driver: netcdf
    args:
      urlpath: "era5_{{ year }}.nc"
    parameters:
      year:
        description: Year to open
        type: int
        default: 2020
        allowed: [2020, 2021]
"#;

fn era5_catalog() -> (TempDir, Catalog) {
    let dir = tempdir().unwrap();
    write_era5(dir.path(), "era5_2020.nc", 280.5);
    write_era5(dir.path(), "era5_2021.nc", 290.0);
    let path = write_catalog(dir.path(), "era5.yaml", ERA5_CATALOG);
    let catalog = Catalog::open(path.to_str().unwrap(), OpenOptions::new()).unwrap();
    (dir, catalog)
}

#[cfg(test)]
mod catalog_tests {
    use super::*;

    /// Listing a glob of disjoint descriptions yields the union of their entries
    #[test]
    fn test_glob_lists_union_of_files() {
        let dir = tempdir().unwrap();
        write_catalog(
            dir.path(),
            "b.yaml",
            "sources:\n  obs: {driver: csv, args: {urlpath: obs.csv}}\n",
        );
        write_catalog(
            dir.path(),
            "a.yaml",
            "sources:\n  era5: {driver: netcdf, args: {urlpath: era5.nc}}\n  gfs: {driver: netcdf, args: {urlpath: gfs.nc}}\n",
        );

        let pattern = dir.path().join("*.yaml");
        let catalog = Catalog::open(pattern.to_str().unwrap(), OpenOptions::new()).unwrap();
        assert_eq!(catalog.list(), vec!["era5", "gfs", "obs"]);
        assert_eq!(catalog.files().len(), 2);

        let single = Catalog::open(dir.path().join("a.yaml").to_str().unwrap(), OpenOptions::new()).unwrap();
        for name in single.list() {
            assert!(catalog.contains(&name));
        }
    }

    #[test]
    fn test_describe_exposes_declaration() {
        let (_dir, catalog) = era5_catalog();
        let entry = catalog.describe("era5_2020").unwrap();
        assert_eq!(entry.driver, "netcdf");
        assert_eq!(entry.description, "ERA5 hourly single levels, January 2020");
        assert_eq!(entry.metadata.tags(), vec!["reanalysis", "temperature"]);
        assert_eq!(entry.metadata.data_types(), vec!["gridded"]);
        assert_eq!(catalog.description(), Some("ERA5 subset"));
    }

    #[test]
    fn test_search_by_data_type() {
        let (_dir, catalog) = era5_catalog();
        let found: Vec<&str> = catalog
            .search(&SearchQuery::new().data_type("gridded"))
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(found, vec!["era5_2020"]);
        assert!(catalog.search(&SearchQuery::new().data_type("station")).is_empty());
    }

    /// A failed lookup leaves the catalog usable and unchanged
    #[test]
    fn test_unknown_dataset_leaves_catalog_unchanged() {
        let (_dir, catalog) = era5_catalog();
        let before = catalog.list();

        assert!(matches!(
            catalog.resolve("era5_1979"),
            Err(CatalogError::UnknownDataset(name)) if name == "era5_1979"
        ));
        assert!(matches!(catalog.describe("nope"), Err(CatalogError::UnknownDataset(_))));

        assert_eq!(catalog.list(), before);
        assert!(catalog.resolve("era5_2020").is_ok());
    }

    #[test]
    fn test_user_parameters_select_file() {
        let (_dir, catalog) = era5_catalog();

        let default = catalog.resolve("era5_year").unwrap();
        let mean = default.reduce("t2m", Reduction::Mean, &[] as &[&str]).unwrap();
        assert_eq!(mean.as_scalar(), Some(280.5));

        let params = BTreeMap::from([("year".to_string(), "2021".to_string())]);
        let other = catalog.resolve_with("era5_year", &params).unwrap();
        let mean = other.reduce("t2m", Reduction::Mean, &[] as &[&str]).unwrap();
        assert_eq!(mean.as_scalar(), Some(290.0));

        let params = BTreeMap::from([("year".to_string(), "1999".to_string())]);
        assert!(matches!(
            catalog.resolve_with("era5_year", &params),
            Err(CatalogError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_missing_data_file() {
        let dir = tempdir().unwrap();
        let path = write_catalog(
            dir.path(),
            "c.yaml",
            "sources:\n  gone: {driver: netcdf, args: {urlpath: gone.nc}}\n",
        );
        let catalog = Catalog::open(path.to_str().unwrap(), OpenOptions::new()).unwrap();
        assert!(matches!(catalog.resolve("gone"), Err(CatalogError::ResourceNotFound(_))));
    }
}

#[cfg(test)]
mod selection_tests {
    use super::*;

    /// Range bounds select the same labels whatever the axis direction
    #[test]
    fn test_descending_latitude_range() {
        let (_dir, catalog) = era5_catalog();
        let dataset = catalog.resolve("era5_2020").unwrap();

        for constraint in [Constraint::range(25.0, 20.0), Constraint::range(20.0, 25.0)] {
            let view = dataset.sel("latitude", constraint).unwrap();
            let lat = view.coordinate("latitude").unwrap();
            assert_eq!(lat.values, vec![25.0, 20.0]);
        }
    }

    /// select then project and project then select describe the same view
    #[test]
    fn test_select_and_project_commute() {
        let (_dir, catalog) = era5_catalog();
        let dataset = catalog.resolve("era5_2020").unwrap();
        let constraints = || {
            vec![
                ("latitude", Constraint::range(30.0, 20.0)),
                ("longitude", Constraint::label(119.0)),
            ]
        };

        let a = dataset.select(constraints()).unwrap().project(["t2m"]).unwrap();
        let b = dataset.project(["t2m"]).unwrap().select(constraints()).unwrap();

        assert_eq!(a.structure(), b.structure());
        assert_eq!(a.values("t2m").unwrap(), b.values("t2m").unwrap());
        assert_eq!(a.shape("t2m").unwrap(), vec![48, 3]);
    }

    #[test]
    fn test_day_selection_on_hourly_axis() {
        let (_dir, catalog) = era5_catalog();
        let dataset = catalog.resolve("era5_2020").unwrap();

        let day = dataset.sel("time", "2020-01-02".parse().unwrap()).unwrap();
        assert_eq!(day.positions("time").unwrap(), (24..48).collect::<Vec<_>>().as_slice());
        assert_eq!(day.shape("cape").unwrap(), vec![24, 5, 3]);

        let hour = dataset.sel("time", "2020-01-01T06:00:00".parse().unwrap()).unwrap();
        assert_eq!(hour.shape("cape").unwrap(), vec![5, 3]);
    }

    #[test]
    fn test_selection_errors() {
        let (_dir, catalog) = era5_catalog();
        let dataset = catalog.resolve("era5_2020").unwrap();

        assert!(matches!(
            dataset.sel("level", Constraint::label(500)),
            Err(CatalogError::UnknownDimension(_))
        ));
        assert!(matches!(
            dataset.sel("latitude", Constraint::label(27.5)),
            Err(CatalogError::OutOfBounds { .. })
        ));
        assert!(matches!(dataset.project(["sst"]), Err(CatalogError::UnknownVariable(_))));
    }

    #[test]
    fn test_range_outside_extent_is_empty() {
        let (_dir, catalog) = era5_catalog();
        let dataset = catalog.resolve("era5_2020").unwrap();
        let view = dataset.sel("latitude", Constraint::range(80.0, 60.0)).unwrap();
        assert_eq!(view.shape("t2m").unwrap(), vec![48, 0, 3]);
        let mean = view.reduce("t2m", Reduction::Mean, &[] as &[&str]).unwrap();
        assert!(mean.as_scalar().unwrap().is_nan());
    }
}

#[cfg(test)]
mod reduction_tests {
    use super::*;

    /// The mean of a constant field is that constant, exactly
    #[test]
    fn test_constant_mean_is_exact() {
        let (_dir, catalog) = era5_catalog();
        let dataset = catalog
            .resolve("era5_2020")
            .unwrap()
            .select([
                ("time", "2020-01-01".parse::<Constraint>().unwrap()),
                ("latitude", Constraint::range(25.0, 15.0)),
            ])
            .unwrap();

        let mean = dataset.reduce("t2m", Reduction::Mean, &[] as &[&str]).unwrap();
        assert_eq!(mean.as_scalar(), Some(280.5));

        let std = dataset.reduce("t2m", Reduction::Std, &[] as &[&str]).unwrap();
        assert_eq!(std.as_scalar(), Some(0.0));
    }

    #[test]
    fn test_count_above_threshold_per_grid_point() {
        let (_dir, catalog) = era5_catalog();
        let dataset = catalog.resolve("era5_2020").unwrap();

        let result = dataset
            .reduce_where("cape", Reduction::Count, &["time"], Threshold::Greater(2000.0))
            .unwrap();
        let MaterializedResult::Array { dims, values, .. } = &result else {
            panic!("Expected an array result");
        };
        assert_eq!(dims, &vec!["latitude".to_string(), "longitude".to_string()]);
        assert_eq!(values.shape(), &[5, 3]);
        assert!(values.iter().all(|&count| count == 27.0));
    }

    #[test]
    fn test_daily_max_over_space() {
        let (_dir, catalog) = era5_catalog();
        let dataset = catalog
            .resolve("era5_2020")
            .unwrap()
            .sel("time", "2020-01-02".parse().unwrap())
            .unwrap();

        let result = dataset
            .reduce("cape", Reduction::Max, &["latitude", "longitude"])
            .unwrap();
        let values: Vec<f64> = result.values().iter().copied().collect();
        assert_eq!(values.len(), 24);
        assert_eq!(values[0], 2400.0);
        assert_eq!(values[23], 4700.0);
    }
}

#[cfg(test)]
mod tabular_tests {
    use super::*;

    /// CATALOG_DIR templates resolve a CSV next to the description
    #[test]
    fn test_csv_through_catalog_dir() {
        let dir = tempdir().unwrap();
        write_stations_csv(dir.path());
        let path = write_catalog(
            dir.path(),
            "obs.yaml",
            "sources:\n  stations:\n    driver: csv\n    args:\n      urlpath: \"{{ CATALOG_DIR }}/stations.csv\"\n",
        );

        let options = OpenOptions::new().with_catalog_dir(dir.path());
        let catalog = Catalog::open(path.to_str().unwrap(), options).unwrap();
        let dataset = catalog.resolve("stations").unwrap();

        assert_eq!(dataset.dims()[0].len, 3);
        let sum = dataset.reduce("y", Reduction::Sum, &[] as &[&str]).unwrap();
        assert_eq!(sum.as_scalar(), Some(15.0));

        let df = dataset.to_dataframe().unwrap();
        assert_eq!(df.shape(), (3, 2));
    }

    #[test]
    fn test_csv_row_selection() {
        let dir = tempdir().unwrap();
        write_stations_csv(dir.path());
        let path = write_catalog(
            dir.path(),
            "obs.yaml",
            "sources:\n  stations: {driver: csv, args: {urlpath: stations.csv}}\n",
        );
        let catalog = Catalog::open(path.to_str().unwrap(), OpenOptions::new()).unwrap();

        let rows = catalog
            .resolve("stations")
            .unwrap()
            .sel("index", Constraint::range(1, 2))
            .unwrap();
        let mean = rows.reduce("x", Reduction::Mean, &[] as &[&str]).unwrap();
        assert_eq!(mean.as_scalar(), Some(2.5));
    }

    /// Rows are records, not text lines
    #[test]
    fn test_multiline_quoted_field_keeps_row_count() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("cities.csv"),
            "name,v\n\"Taipei\nMain\",1\nHsinchu,2\nTainan,3\n",
        )
        .unwrap();
        let path = write_catalog(
            dir.path(),
            "cities.yaml",
            "sources:\n  cities: {driver: csv, args: {urlpath: cities.csv}}\n",
        );
        let catalog = Catalog::open(path.to_str().unwrap(), OpenOptions::new()).unwrap();
        let dataset = catalog.resolve("cities").unwrap();
        assert_eq!(dataset.dims()[0].len, 3);

        let ends = dataset.sel("index", Constraint::list([0.0, 2.0])).unwrap();
        let sum = ends.reduce("v", Reduction::Sum, &[] as &[&str]).unwrap();
        assert_eq!(sum.as_scalar(), Some(4.0));
    }

    /// Losing the backing file after resolve surfaces as a compute error
    #[test]
    fn test_deleted_backing_file_is_compute_error() {
        let dir = tempdir().unwrap();
        let mut df = polars::df!("x" => &[1i64, 2, 3], "y" => &[4.0f64, 5.0, 6.0]).unwrap();
        polars::prelude::ParquetWriter::new(fs::File::create(dir.path().join("obs.parquet")).unwrap())
            .finish(&mut df)
            .unwrap();
        write_era5(dir.path(), "era5.nc", 280.0);
        let path = write_catalog(
            dir.path(),
            "mixed.yaml",
            "sources:\n  obs: {driver: parquet, args: {urlpath: obs.parquet}}\n  era5: {driver: netcdf, args: {urlpath: era5.nc}}\n",
        );
        let catalog = Catalog::open(path.to_str().unwrap(), OpenOptions::new()).unwrap();
        let obs = catalog.resolve("obs").unwrap();
        let era5 = catalog.resolve("era5").unwrap();

        fs::remove_file(dir.path().join("obs.parquet")).unwrap();
        fs::remove_file(dir.path().join("era5.nc")).unwrap();

        let err = obs.reduce("y", Reduction::Sum, &[] as &[&str]).unwrap_err();
        assert!(err.is_compute(), "unexpected error: {err}");
        let err = era5.reduce("t2m", Reduction::Mean, &[] as &[&str]).unwrap_err();
        assert!(err.is_compute(), "unexpected error: {err}");
    }
}

#[cfg(test)]
mod zarr_tests {
    use super::*;

    #[test]
    fn test_zarr_entry_resolves_and_reduces() {
        let dir = tempdir().unwrap();
        crate::zarr_source::tests::write_store(dir.path());
        let path = write_catalog(
            dir.path(),
            "zarr.yaml",
            "sources:\n  era5_hourly_global: {driver: zarr, args: {urlpath: era5.zarr}}\n",
        );
        let catalog = Catalog::open(path.to_str().unwrap(), OpenOptions::new()).unwrap();
        let dataset = catalog
            .resolve("era5_hourly_global")
            .unwrap()
            .sel("latitude", Constraint::range(25.0, 10.0))
            .unwrap();
        assert_eq!(dataset.coordinate("latitude").unwrap().values, vec![20.0, 10.0]);

        // t2m[time, latitude] = 280 + 3 * time + latitude index
        let max = dataset.reduce("t2m", Reduction::Max, &["latitude"]).unwrap();
        assert_eq!(max.values().iter().copied().collect::<Vec<_>>(), vec![282.0, 285.0, 288.0]);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use polars::prelude::*;
    use crate::selection::Label;

    #[tokio::test]
    async fn test_export_selected_view_to_parquet() {
        let (dir, catalog) = era5_catalog();
        let dataset = catalog
            .resolve("era5_2020")
            .unwrap()
            .select([
                ("time", Constraint::label("2020-01-01T00:00:00".parse::<Label>().unwrap())),
                ("latitude", Constraint::range(25.0, 20.0)),
            ])
            .unwrap()
            .project(["t2m"])
            .unwrap();

        let output = dir.path().join("out").join("t2m.parquet");
        let rows = crate::output::export(&dataset, output.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(rows, 2 * 3);

        let df = ParquetReader::new(fs::File::open(&output).unwrap()).finish().unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["latitude", "longitude", "t2m"]);
        assert_eq!(df.height(), 6);
    }

    #[test]
    fn test_batch_over_catalog() {
        let (_dir, catalog) = era5_catalog();
        let names = vec!["era5_2020".to_string(), "era5_year".to_string(), "missing".to_string()];
        let request = ReduceRequest::new("t2m", Reduction::Mean).select("latitude", Constraint::label(20.0));

        let mut progress = 0;
        let report = reduce_entries(&catalog, &names, &request, |_, _| progress += 1);

        assert_eq!(progress, 3);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].1.as_scalar(), Some(280.5));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "missing");
    }

    #[test]
    fn test_last_wins_merge_resolves_later_file() {
        let dir = tempdir().unwrap();
        write_era5(dir.path(), "old.nc", 250.0);
        write_era5(dir.path(), "new.nc", 260.0);
        write_catalog(dir.path(), "1.yaml", "sources:\n  t: {driver: netcdf, args: {urlpath: old.nc}}\n");
        write_catalog(dir.path(), "2.yaml", "sources:\n  t: {driver: netcdf, args: {urlpath: new.nc}}\n");
        let pattern = dir.path().join("*.yaml");

        let strict = Catalog::open(pattern.to_str().unwrap(), OpenOptions::new());
        assert!(matches!(strict, Err(CatalogError::DuplicateEntry { .. })));

        let options = OpenOptions::new().with_duplicate_policy(DuplicatePolicy::LastWins);
        let catalog = Catalog::open(pattern.to_str().unwrap(), options).unwrap();
        let mean = catalog
            .resolve("t")
            .unwrap()
            .reduce("t2m", Reduction::Mean, &[] as &[&str])
            .unwrap();
        assert_eq!(mean.as_scalar(), Some(260.0));
    }
}
