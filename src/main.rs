fn main() {
    quillpad_lib::run()
}
